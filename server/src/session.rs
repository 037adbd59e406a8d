//! Server-side state of one authenticated connection

use parking_lot::Mutex;
use parlor_shared::{Codec, Envelope, Frame, Profile, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Why a frame could not be handed to a session's transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The writer task is gone
    Closed,
    /// The outbound queue stayed full for the whole write timeout
    Timeout,
    /// The envelope could not be encoded in the session's codec
    Encoding,
}

/// A frame waiting in a connection's outbound queue.
///
/// When `written` is set, the writer fires it once the frame has been handed
/// to the socket. Dropping it unfired means the write never happened.
#[derive(Debug)]
pub struct Outbound {
    pub frame: Frame,
    pub written: Option<oneshot::Sender<()>>,
}

impl Outbound {
    /// Report a completed socket write to whoever is waiting on it.
    pub fn confirm(written: Option<oneshot::Sender<()>>) {
        if let Some(written) = written {
            let _ = written.send(());
        }
    }
}

impl From<Frame> for Outbound {
    fn from(frame: Frame) -> Self {
        Self { frame, written: None }
    }
}

/// Transport handles of a connection, created before authentication.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub outbound: mpsc::Sender<Outbound>,
    pub cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            outbound,
            cancel: CancellationToken::new(),
        }
    }
}

/// One authenticated live connection.
///
/// The outbound queue is drained by the connection's writer task; cancelling
/// the token closes the transport and ends the read loop. Profile fields are
/// shared with other workers through the registry and sit behind their own
/// lock, which is never held across I/O.
pub struct Session {
    user_id: UserId,
    connection_id: u64,
    codec: Codec,
    handle: ConnectionHandle,
    write_timeout: Duration,
    profile: Mutex<Profile>,
}

impl Session {
    pub fn new(profile: Profile, codec: Codec, handle: ConnectionHandle, write_timeout: Duration) -> Self {
        Self {
            user_id: profile.user_id,
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            codec,
            handle,
            write_timeout,
            profile: Mutex::new(profile),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Process-unique id of the underlying connection. Two sessions for the
    /// same user never share one.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn friend_list(&self) -> Vec<UserId> {
        self.profile.lock().user_friend_list.clone()
    }

    pub fn set_friend_list(&self, friends: Vec<UserId>) {
        self.profile.lock().user_friend_list = friends;
    }

    pub fn set_avatar(&self, avatar: String) {
        self.profile.lock().user_avatar = avatar;
    }

    fn encode(&self, envelope: &Envelope) -> Result<Frame, SendError> {
        self.codec.encode(envelope).map_err(|_| SendError::Encoding)
    }

    /// Queue an envelope for the transport, waiting at most the write timeout
    /// for room in the queue.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        let frame = self.encode(envelope)?;
        match tokio::time::timeout(self.write_timeout, self.handle.outbound.send(frame.into())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Closed),
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Queue an envelope and wait until the writer has put it on the socket.
    ///
    /// Queueing and writing together get the write timeout. `Closed` means
    /// the writer dropped the frame, either because it died or because the
    /// socket write failed.
    pub async fn deliver(&self, envelope: &Envelope) -> Result<(), SendError> {
        let frame = self.encode(envelope)?;
        let (written, confirmed) = oneshot::channel();
        let outbound = Outbound { frame, written: Some(written) };

        let attempt = async {
            self.handle.outbound.send(outbound).await.map_err(|_| SendError::Closed)?;
            confirmed.await.map_err(|_| SendError::Closed)
        };
        match tokio::time::timeout(self.write_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Queue an envelope only if there is room right now.
    pub fn try_send(&self, envelope: &Envelope) -> Result<(), SendError> {
        let frame = self.encode(envelope)?;
        self.handle.outbound.try_send(frame.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Timeout,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Ask the connection to shut down. Idempotent.
    pub fn close(&self) {
        self.handle.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.handle.cancel.is_cancelled()
    }

    /// Resolves once `close` has been called or the writer has died.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.handle.cancel.cancelled()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("connection_id", &self.connection_id)
            .field("codec", &self.codec)
            .finish()
    }
}
