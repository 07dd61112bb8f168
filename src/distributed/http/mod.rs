//! Minimal JSON-over-HTTP plumbing between drivers and agents.
mod client;
mod server;

pub(crate) use client::ClusterClient;
pub(crate) use server::{HttpError, HttpRequest, HttpResponse, RouteHandler, bind_listener, serve};
