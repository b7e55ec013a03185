//! Services are request/response endpoints, analagous to ROS services.
//!
//! The node that owns a `Service` decides when requests are handled by
//! polling it, so a single threaded node can interleave requests with
//! its own work. Callers hold a cheap, clonable `ServiceHandle`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

/// A pending request that must be answered with `respond`.
///
/// Dropping a request without responding makes the caller's
/// `call` return `None`.
pub struct ServiceRequest<Input, Output> {
    input: Input,
    sender: oneshot::Sender<Output>,
}

impl<Input, Output> ServiceRequest<Input, Output> {
    pub fn get_input(&self) -> &Input {
        &self.input
    }

    /// Splits the request into its input and a `Responder`.
    pub fn into_parts(self) -> (Input, Responder<Output>) {
        (
            self.input,
            Responder {
                sender: self.sender,
            },
        )
    }

    /// Answers the request. Returns false if the caller stopped waiting.
    pub fn respond(self, output: Output) -> bool {
        self.sender.send(output).is_ok()
    }
}

/// The response half of a `ServiceRequest`.
pub struct Responder<Output> {
    sender: oneshot::Sender<Output>,
}

impl<Output> Responder<Output> {
    pub fn respond(self, output: Output) -> bool {
        self.sender.send(output).is_ok()
    }
}

/// The serving half of a service. Owned by exactly one node.
pub struct Service<Input, Output> {
    path: Arc<str>,
    request_recv: mpsc::UnboundedReceiver<ServiceRequest<Input, Output>>,
}

/// The calling half of a service.
pub struct ServiceHandle<Input, Output> {
    path: Arc<str>,
    request_sender: mpsc::UnboundedSender<ServiceRequest<Input, Output>>,
}

impl<Input, Output> Clone for ServiceHandle<Input, Output> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            request_sender: self.request_sender.clone(),
        }
    }
}

#[must_use]
pub fn new_service<Input, Output>(
    path: impl Into<Arc<str>>,
) -> (Service<Input, Output>, ServiceHandle<Input, Output>) {
    let path = path.into();
    let (request_sender, request_recv) = mpsc::unbounded_channel();
    (
        Service {
            path: path.clone(),
            request_recv,
        },
        ServiceHandle {
            path,
            request_sender,
        },
    )
}

impl<Input, Output> Service<Input, Output> {
    pub fn get_path(&self) -> &Arc<str> {
        &self.path
    }

    /// Takes the next pending request without blocking.
    pub fn try_next_request(&mut self) -> Option<ServiceRequest<Input, Output>> {
        self.request_recv.try_recv().ok()
    }

    /// Waits for the next request, or `None` if every handle has been dropped.
    pub async fn wait_for_request(&mut self) -> Option<ServiceRequest<Input, Output>> {
        self.request_recv.recv().await
    }

    /// Answers every pending request with `handler`, returning how many were handled.
    pub fn handle_pending(&mut self, mut handler: impl FnMut(Input) -> Output) -> usize {
        let mut handled = 0;
        while let Some(request) = self.try_next_request() {
            let (input, responder) = request.into_parts();
            responder.respond(handler(input));
            handled += 1;
        }
        handled
    }
}

impl<Input, Output> ServiceHandle<Input, Output> {
    pub fn get_path(&self) -> &Arc<str> {
        &self.path
    }

    fn send(&self, input: Input) -> Option<oneshot::Receiver<Output>> {
        let (sender, receiver) = oneshot::channel();
        self.request_sender
            .send(ServiceRequest { input, sender })
            .ok()?;
        Some(receiver)
    }

    /// Calls the service, or returns `None` if the service was dropped
    /// or dropped the request.
    pub async fn call(&self, input: Input) -> Option<Output> {
        self.send(input)?.await.ok()
    }

    /// Calls the service from synchronous code.
    ///
    /// This must not be called from within an asynchronous context, nor
    /// from the thread that serves the request.
    pub fn blocking_call(&self, input: Input) -> Option<Output> {
        self.send(input)?.blocking_recv().ok()
    }
}
