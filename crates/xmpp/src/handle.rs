use board_core::event::MessageType;
use tokio::sync::{mpsc, oneshot};

use crate::{error::SessionError, session::SessionSnapshot};

type Reply<T> = oneshot::Sender<T>;

/// Requests accepted by the session control loop.
#[derive(Debug)]
pub enum SessionCommand {
    Initialize {
        address: String,
        reply: Reply<Result<(), SessionError>>,
    },
    InitializeConfigured {
        reply: Reply<Result<(), SessionError>>,
    },
    SendMessage {
        to: String,
        body: String,
        message_type: MessageType,
        reply: Reply<Result<String, SessionError>>,
    },
    SendRoomMessage {
        body: String,
        reply: Reply<Result<String, SessionError>>,
    },
    Disconnect {
        reply: Reply<Result<(), SessionError>>,
    },
    DiscoverInfo {
        to: Option<String>,
        node: Option<String>,
        reply: Reply<Result<String, SessionError>>,
    },
    DiscoverItems {
        to: Option<String>,
        node: Option<String>,
        reply: Reply<Result<String, SessionError>>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Cloneable front end of a spawned session. Every call is serialized onto
/// the session's control loop.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub(crate) fn new(commands: mpsc::Sender<SessionCommand>) -> Self {
        Self { commands }
    }

    pub async fn initialize(&self, address: impl Into<String>) -> Result<(), SessionError> {
        let address = address.into();
        self.request(|reply| SessionCommand::Initialize { address, reply })
            .await?
    }

    /// Initializes against the server address from configuration.
    pub async fn initialize_configured(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::InitializeConfigured { reply })
            .await?
    }

    /// Sends a message and returns its id for later acknowledgement.
    pub async fn send_message(
        &self,
        to: impl Into<String>,
        body: impl Into<String>,
        message_type: MessageType,
    ) -> Result<String, SessionError> {
        let (to, body) = (to.into(), body.into());
        self.request(|reply| SessionCommand::SendMessage {
            to,
            body,
            message_type,
            reply,
        })
        .await?
    }

    pub async fn send_room_message(&self, body: impl Into<String>) -> Result<String, SessionError> {
        let body = body.into();
        self.request(|reply| SessionCommand::SendRoomMessage { body, reply })
            .await?
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Disconnect { reply })
            .await?
    }

    /// `None` queries the configured server domain.
    pub async fn discover_info(
        &self,
        to: Option<String>,
        node: Option<String>,
    ) -> Result<String, SessionError> {
        self.request(|reply| SessionCommand::DiscoverInfo { to, node, reply })
            .await?
    }

    pub async fn discover_items(
        &self,
        to: Option<String>,
        node: Option<String>,
    ) -> Result<String, SessionError> {
        self.request(|reply| SessionCommand::DiscoverItems { to, node, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// Stops the control loop. Pending timers are dropped with it.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Shutdown { reply }).await
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(Reply<R>) -> SessionCommand,
    ) -> Result<R, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn requests_fail_once_the_loop_is_gone() {
        let (commands, receiver) = mpsc::channel(1);
        drop(receiver);
        let handle = SessionHandle::new(commands);

        assert!(matches!(handle.snapshot().await, Err(SessionError::Closed)));
        assert!(matches!(
            handle.send_room_message("hi").await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dropped_reply_maps_to_closed() {
        let (commands, mut receiver) = mpsc::channel(1);
        let handle = SessionHandle::new(commands);

        let responder = tokio::spawn(async move {
            if let Some(SessionCommand::Disconnect { reply }) = receiver.recv().await {
                drop(reply);
            }
        });

        assert!(matches!(handle.disconnect().await, Err(SessionError::Closed)));
        responder.await.unwrap();
    }
}
