//! Messages sent over the bus.
//!
//! The layouts follow the ROS `sensor_msgs` and `std_msgs` types of the
//! same names so that a bridge can forward them field by field.

use chrono::{DateTime, Utc};
use image::{GrayImage, RgbImage};

use crate::{
    frames::{DepthImage, Intrinsics},
    processing::PointCloud,
};

const IS_BIGENDIAN: u8 = cfg!(target_endian = "big") as u8;

#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub seq: u32,
    pub stamp: DateTime<Utc>,
    pub frame_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImageMsg {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub encoding: &'static str,
    pub is_bigendian: u8,
    /// Bytes per row.
    pub step: u32,
    pub data: Vec<u8>,
}

impl ImageMsg {
    pub const RGB8: &'static str = "rgb8";
    pub const MONO8: &'static str = "mono8";
    pub const MONO16: &'static str = "16UC1";

    pub fn rgb8(header: Header, image: &RgbImage) -> Self {
        Self {
            header,
            height: image.height(),
            width: image.width(),
            encoding: Self::RGB8,
            is_bigendian: 0,
            step: image.width() * 3,
            data: image.as_raw().clone(),
        }
    }

    pub fn mono8(header: Header, image: &GrayImage) -> Self {
        Self {
            header,
            height: image.height(),
            width: image.width(),
            encoding: Self::MONO8,
            is_bigendian: 0,
            step: image.width(),
            data: image.as_raw().clone(),
        }
    }

    /// The raw depth samples, in depth units.
    pub fn mono16(header: Header, depth: &DepthImage) -> Self {
        Self {
            header,
            height: depth.height(),
            width: depth.width(),
            encoding: Self::MONO16,
            is_bigendian: IS_BIGENDIAN,
            step: depth.width() * 2,
            data: bytemuck::cast_slice(depth.pixels.as_raw()).to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointField {
    pub name: &'static str,
    pub offset: u32,
    pub datatype: u8,
    pub count: u32,
}

impl PointField {
    pub const INT8: u8 = 1;
    pub const UINT8: u8 = 2;
    pub const INT16: u8 = 3;
    pub const UINT16: u8 = 4;
    pub const INT32: u8 = 5;
    pub const UINT32: u8 = 6;
    pub const FLOAT32: u8 = 7;
    pub const FLOAT64: u8 = 8;

    /// `x`, `y` and `z` as consecutive 32 bit floats.
    pub fn xyz() -> Vec<Self> {
        ["x", "y", "z"]
            .into_iter()
            .zip(0..)
            .map(|(name, i)| Self {
                name,
                offset: i * 4,
                datatype: Self::FLOAT32,
                count: 1,
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PointCloud2 {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub fields: Vec<PointField>,
    pub is_bigendian: u8,
    pub point_step: u32,
    pub row_step: u32,
    pub data: Vec<u8>,
    pub is_dense: bool,
}

impl PointCloud2 {
    /// An unorganized cloud of the point positions, in the cloud's order.
    pub fn xyz(header: Header, cloud: &PointCloud) -> Self {
        let positions: Vec<[f32; 3]> = cloud
            .iter()
            .map(|point| point.position.coords.into())
            .collect();
        let point_step = 12;
        Self {
            header,
            height: 1,
            width: positions.len() as u32,
            fields: PointField::xyz(),
            is_bigendian: IS_BIGENDIAN,
            point_step,
            row_step: point_step * positions.len() as u32,
            data: bytemuck::cast_slice(&positions).to_vec(),
            is_dense: true,
        }
    }

    pub fn positions(&self) -> impl Iterator<Item = [f32; 3]> + '_ {
        self.data
            .chunks_exact(self.point_step as usize)
            .map(|chunk| bytemuck::pod_read_unaligned(&chunk[..12]))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiArrayDimension {
    pub label: &'static str,
    pub size: u32,
    pub stride: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct MultiArrayLayout {
    pub dim: Vec<MultiArrayDimension>,
    pub data_offset: u32,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Float32MultiArray {
    pub layout: MultiArrayLayout,
    pub data: Vec<f32>,
}

impl Float32MultiArray {
    /// A row major `length x inner` matrix.
    pub fn matrix(inner_label: &'static str, inner: u32, data: Vec<f32>) -> Self {
        let length = data.len() as u32 / inner.max(1);
        Self {
            layout: MultiArrayLayout {
                dim: vec![
                    MultiArrayDimension {
                        label: "length",
                        size: length,
                        stride: length * inner,
                    },
                    MultiArrayDimension {
                        label: inner_label,
                        size: inner,
                        stride: inner,
                    },
                ],
                data_offset: 0,
            },
            data,
        }
    }

    /// Row `i` is the color image pixel `(u, v)` that point `i` projects onto.
    pub fn uv_mapping(cloud: &PointCloud) -> Self {
        let data = cloud
            .iter()
            .flat_map(|point| [point.pixel.x, point.pixel.y])
            .collect();
        Self::matrix("pair", 2, data)
    }

    /// Row `i` is the color of point `i` with channels in `[0, 1]`, or all
    /// `-1` if the point falls outside the color image.
    pub fn colors(cloud: &PointCloud) -> Self {
        let data = cloud
            .iter()
            .flat_map(|point| match point.color {
                Some(color) => color.0.map(|c| c as f32 / 255.0),
                None => [-1.0; 3],
            })
            .collect();
        Self::matrix("rgb", 3, data)
    }

    pub fn rows(&self) -> usize {
        self.layout.dim.first().map(|d| d.size as usize).unwrap_or_default()
    }

    pub fn row(&self, i: usize) -> Option<&[f32]> {
        let inner = self.layout.dim.get(1)?.size as usize;
        self.data.get(i * inner..(i + 1) * inner)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CameraIntrinsics {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub ppx: f32,
    pub ppy: f32,
}

impl CameraIntrinsics {
    pub fn new(header: Header, intrinsics: &Intrinsics) -> Self {
        Self {
            header,
            width: intrinsics.width,
            height: intrinsics.height,
            fx: intrinsics.fx,
            fy: intrinsics.fy,
            ppx: intrinsics.ppx,
            ppy: intrinsics.ppy,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use image::{ImageBuffer, Luma, Rgb};
    use nalgebra::{Point2, Point3};

    use super::*;
    use crate::processing::CloudPoint;

    fn header() -> Header {
        Header {
            seq: 3,
            stamp: Utc::now(),
            frame_id: "camera".into(),
        }
    }

    fn cloud() -> PointCloud {
        let points: Arc<[CloudPoint]> = Arc::new([
            CloudPoint {
                position: Point3::new(0.1, -0.2, 0.9),
                color: Some(Rgb([255, 0, 51])),
                pixel: Point2::new(10.0, 20.0),
                source: [5, 10],
            },
            CloudPoint {
                position: Point3::new(1.0, 0.0, 1.5),
                color: None,
                pixel: Point2::new(-3.0, 4.5),
                source: [0, 2],
            },
        ]);
        PointCloud { points }
    }

    #[test]
    fn point_cloud_layout() {
        let msg = PointCloud2::xyz(header(), &cloud());
        assert_eq!((msg.height, msg.width), (1, 2));
        assert_eq!(msg.point_step, 12);
        assert_eq!(msg.row_step, 24);
        assert_eq!(msg.data.len(), 24);
        let names: Vec<_> = msg.fields.iter().map(|f| (f.name, f.offset)).collect();
        assert_eq!(names, [("x", 0), ("y", 4), ("z", 8)]);
        assert!(msg.fields.iter().all(|f| f.datatype == PointField::FLOAT32));

        let positions: Vec<_> = msg.positions().collect();
        assert_eq!(positions, [[0.1, -0.2, 0.9], [1.0, 0.0, 1.5]]);
    }

    #[test]
    fn uv_rows_follow_point_order() {
        let uv = Float32MultiArray::uv_mapping(&cloud());
        assert_eq!(uv.layout.dim[0].label, "length");
        assert_eq!(uv.layout.dim[1].label, "pair");
        assert_eq!(uv.rows(), 2);
        assert_eq!(uv.row(0), Some(&[10.0, 20.0][..]));
        assert_eq!(uv.row(1), Some(&[-3.0, 4.5][..]));
        assert_eq!(uv.row(2), None);
    }

    #[test]
    fn colors_are_normalized() {
        let colors = Float32MultiArray::colors(&cloud());
        assert_eq!(colors.layout.dim[1].size, 3);
        assert_eq!(colors.row(0), Some(&[1.0, 0.0, 0.2][..]));
        assert_eq!(colors.row(1), Some(&[-1.0, -1.0, -1.0][..]));
    }

    #[test]
    fn depth_image_encodings() {
        let pixels = ImageBuffer::from_fn(3, 2, |x, y| Luma([(x + y * 3) as u16 * 300]));
        let depth = DepthImage::new(pixels, 0.001, Intrinsics::centered(3, 2, 1.0));
        let msg = ImageMsg::mono16(header(), &depth);
        assert_eq!(msg.encoding, "16UC1");
        assert_eq!(msg.step, 6);
        assert_eq!(msg.data.len(), 12);
        let last: u16 = bytemuck::pod_read_unaligned(&msg.data[10..]);
        assert_eq!(last, 1500);

        let gray = GrayImage::from_pixel(4, 2, Luma([9]));
        let msg = ImageMsg::mono8(header(), &gray);
        assert_eq!((msg.width, msg.height, msg.step), (4, 2, 4));
    }
}
