//! A `Bus` gives topics and services a path so that nodes can find each
//! other without sharing handles directly, similar to the ROS master.

use std::{
    any::Any,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use fxhash::FxHashMap;

use crate::{
    pubsub::{Publisher, PublisherRef, Subscriber},
    service::{new_service, Service, ServiceHandle},
};

#[derive(Default)]
struct BusInner {
    topics: FxHashMap<Arc<str>, Box<dyn Any + Send>>,
    services: FxHashMap<Arc<str>, Box<dyn Any + Send>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BusError {
    /// Something is already advertised at this path.
    AlreadyAdvertised(Arc<str>),
    /// Nothing is advertised at this path.
    NotAdvertised(Arc<str>),
    /// The path is advertised with a different message type.
    TypeMismatch(Arc<str>),
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyAdvertised(path) => write!(f, "{path} is already advertised"),
            Self::NotAdvertised(path) => write!(f, "{path} is not advertised"),
            Self::TypeMismatch(path) => write!(f, "{path} is advertised with a different type"),
        }
    }
}

impl std::error::Error for BusError {}

/// A cheap, clonable registry of advertised topics and services.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<Mutex<BusInner>>,
}

/// Joins a base path and a relative name with exactly one `/`.
pub fn join_path(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if name.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{name}")
    }
}

impl Bus {
    fn lock(&self) -> MutexGuard<BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a publisher on `topic`. Publishers that should hand their last
    /// message to late subscribers must set `latch`.
    pub fn advertise<T: Clone + Send + 'static>(
        &self,
        topic: &str,
        latch: bool,
    ) -> Result<Publisher<T>, BusError> {
        let topic: Arc<str> = topic.into();
        let mut inner = self.lock();
        if let Some(entry) = inner.topics.get(&topic) {
            // A dropped publisher of the same type may be replaced
            match entry.downcast_ref::<PublisherRef<T>>() {
                Some(pub_ref) if pub_ref.is_closed() => {}
                _ => return Err(BusError::AlreadyAdvertised(topic)),
            }
        }
        let publisher = if latch {
            Publisher::new_latched()
        } else {
            Publisher::new()
        };
        inner.topics.insert(topic, Box::new(publisher.get_ref()));
        Ok(publisher)
    }

    /// Subscribes to an advertised topic with a queue of `size` messages.
    pub fn subscribe<T: Clone + Send + 'static>(
        &self,
        topic: &str,
        size: usize,
    ) -> Result<Subscriber<T>, BusError> {
        let inner = self.lock();
        let entry = inner
            .topics
            .get(topic)
            .ok_or_else(|| BusError::NotAdvertised(topic.into()))?;
        let pub_ref = entry
            .downcast_ref::<PublisherRef<T>>()
            .ok_or_else(|| BusError::TypeMismatch(topic.into()))?;
        let sub = Subscriber::new(size);
        if !pub_ref.accept_subscription_or_closed(sub.create_subscription()) {
            return Err(BusError::NotAdvertised(topic.into()));
        }
        Ok(sub)
    }

    /// Creates a service at `path`, keeping a handle so callers can find it.
    pub fn advertise_service<Input: Send + 'static, Output: Send + 'static>(
        &self,
        path: &str,
    ) -> Result<Service<Input, Output>, BusError> {
        let path: Arc<str> = path.into();
        let mut inner = self.lock();
        if inner.services.contains_key(&path) {
            return Err(BusError::AlreadyAdvertised(path));
        }
        let (service, handle) = new_service::<Input, Output>(path.clone());
        inner.services.insert(path, Box::new(handle));
        Ok(service)
    }

    /// Gets a handle to call the service at `path`.
    pub fn service_client<Input: Send + 'static, Output: Send + 'static>(
        &self,
        path: &str,
    ) -> Result<ServiceHandle<Input, Output>, BusError> {
        let inner = self.lock();
        let entry = inner
            .services
            .get(path)
            .ok_or_else(|| BusError::NotAdvertised(path.into()))?;
        entry
            .downcast_ref::<ServiceHandle<Input, Output>>()
            .cloned()
            .ok_or_else(|| BusError::TypeMismatch(path.into()))
    }

    /// Every advertised topic and service path, sorted.
    pub fn list_paths(&self) -> Vec<Arc<str>> {
        let inner = self.lock();
        let mut paths: Vec<_> = inner
            .topics
            .keys()
            .chain(inner.services.keys())
            .cloned()
            .collect();
        paths.sort();
        paths
    }
}
