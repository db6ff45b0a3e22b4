//! Fake Modbus TCP device shared by the integration tests.

#![allow(dead_code)]

use std::future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_modbus::{
    prelude::*,
    server::tcp::{Server, accept_tcp_connection},
};

/// Holding registers `addr` hold `addr * 100 + tick`; `tick` advances per read.
#[derive(Clone, Default)]
pub struct FakeDevice {
    tick: Arc<AtomicU16>,
    reads: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl FakeDevice {
    /// Answer every following read with `IllegalDataAddress`.
    pub fn fail_reads(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl tokio_modbus::server::Service for FakeDevice {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadHoldingRegisters(_, _) if self.fail.load(Ordering::SeqCst) => {
                Err(ExceptionCode::IllegalDataAddress)
            }
            Request::ReadHoldingRegisters(addr, cnt) => {
                self.reads.fetch_add(1, Ordering::SeqCst);
                let tick = self.tick.fetch_add(1, Ordering::SeqCst);
                Ok(Response::ReadHoldingRegisters(
                    (addr..addr.saturating_add(cnt))
                        .map(|a| a.wrapping_mul(100).wrapping_add(tick))
                        .collect(),
                ))
            }
            _ => Err(ExceptionCode::IllegalFunction),
        };
        future::ready(res)
    }
}

/// Serve `device` on an ephemeral localhost port.
pub async fn start_fake_device(device: FakeDevice) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind fake device");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let server = Server::new(listener);

    let on_connected = move |stream, socket_addr| {
        let device = device.clone();
        async move {
            accept_tcp_connection(stream, socket_addr, move |_| {
                Ok::<_, std::io::Error>(Some(device.clone()))
            })
        }
    };
    let on_process_error = |err| {
        eprintln!("Fake device error: {err}");
    };

    let handle = tokio::spawn(async move {
        if let Err(e) = server.serve(&on_connected, on_process_error).await {
            eprintln!("Fake device stopped: {e}");
        }
    });

    (addr, handle)
}

/// A localhost port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind probe listener");
    let port = listener.local_addr().expect("Failed to get local addr").port();
    drop(listener);
    port
}
