use russh::server::Handle;
use russh::{ChannelId, CryptoVec};

use crate::error::{Result, SessionError};
use crate::session::SessionSink;

/// SSH_EXTENDED_DATA_STDERR
const EXTENDED_DATA_STDERR: u32 = 1;

/// Session output over a russh server channel.
#[derive(Clone)]
pub struct ChannelSink {
    handle: Handle,
    channel_id: ChannelId,
}

impl ChannelSink {
    pub fn new(handle: Handle, channel_id: ChannelId) -> Self {
        Self { handle, channel_id }
    }
}

impl SessionSink for ChannelSink {
    async fn data(&self, bytes: &[u8]) -> Result<()> {
        self.handle
            .data(self.channel_id, CryptoVec::from_slice(bytes))
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }

    async fn stderr(&self, bytes: &[u8]) -> Result<()> {
        self.handle
            .extended_data(self.channel_id, EXTENDED_DATA_STDERR, CryptoVec::from_slice(bytes))
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }

    async fn exit_status(&self, code: u32) {
        let _ = self.handle.exit_status_request(self.channel_id, code).await;
    }

    async fn close(&self) {
        let _ = self.handle.eof(self.channel_id).await;
        let _ = self.handle.close(self.channel_id).await;
    }
}
