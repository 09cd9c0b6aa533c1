use std::{future::Future, net::SocketAddr};

use anyhow::{Context, Result};
use tokio::{
    net::{ToSocketAddrs, UdpSocket},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    dispatch::{Dispatcher, Flow, Outgoing},
    message::FRAME_LEN,
};

/// UDP chat server: one socket, one loop, one datagram at a time.
pub struct Server {
    socket: UdpSocket,
    dispatcher: Dispatcher,
}

impl Server {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            dispatcher: Dispatcher::new(),
        }
    }

    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .context("failed to bind server socket")?;
        Ok(Self::new(socket))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serves until a client sends EXIT or `shutdown` resolves. Either way
    /// every online session is told to exit.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            socket,
            mut dispatcher,
        } = self;
        tokio::pin!(shutdown);

        // One spare byte so oversized datagrams show up as a length mismatch.
        let mut buffer = [0u8; FRAME_LEN + 1];
        loop {
            select! {
                _ = &mut shutdown => {
                    info!(sessions = dispatcher.sessions().len(), "server shutting down");
                    let farewell = dispatcher.shutdown();
                    deliver(&socket, farewell).await;
                    break;
                }
                received = socket.recv_from(&mut buffer) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(err) => {
                            warn!(error = ?err, "failed to receive datagram");
                            continue;
                        }
                    };
                    let outcome = dispatcher.handle_datagram(&buffer[..len], peer);
                    deliver(&socket, outcome.outgoing).await;
                    if outcome.flow == Flow::Terminate {
                        break;
                    }
                }
            }
        }

        info!("server stopped");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

async fn deliver(socket: &UdpSocket, outgoing: Vec<Outgoing>) {
    for Outgoing { to, message } in outgoing {
        let frame = message.encode();
        match socket.send_to(&frame, to).await {
            Ok(_) => debug!(peer = %to, kind = ?message.kind(), "sent"),
            Err(err) => warn!(peer = %to, error = ?err, "failed to send datagram"),
        }
    }
}
