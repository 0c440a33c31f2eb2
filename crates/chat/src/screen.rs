use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::controller::{ConversationController, ExchangeState};
use crate::transcript::TranscriptSnapshot;
use crate::visibility::{PeerRegion, PeerVisibilityGuard, VisibilityConfig};

/// How a conversational screen was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitReason {
    Back,
    Replace,
    Unmount,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Back => "back",
            Self::Replace => "replace",
            Self::Unmount => "unmount",
        };
        formatter.write_str(label)
    }
}

/// One mounted conversational screen: a session plus the hidden peer region.
///
/// Field order matters: the controller is torn down before the peer region is restored.
pub struct ConversationScreen {
    controller: ConversationController,
    peer_visibility: PeerVisibilityGuard,
}

impl ConversationScreen {
    pub fn open(
        controller: ConversationController,
        region: Arc<dyn PeerRegion>,
        restore: VisibilityConfig,
    ) -> Self {
        let peer_visibility = PeerVisibilityGuard::acquire(region, restore);
        tracing::info!(
            dispatcher_id = %controller.dispatcher_id(),
            "conversation screen opened"
        );
        Self {
            controller,
            peer_visibility,
        }
    }

    pub fn submit(&self, raw: &str) {
        self.controller.submit(raw);
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        self.controller.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.controller.subscribe()
    }

    pub fn state(&self) -> ExchangeState {
        self.controller.state()
    }

    pub fn controller(&self) -> &ConversationController {
        &self.controller
    }

    pub fn restore_config(&self) -> &VisibilityConfig {
        self.peer_visibility.restore_config()
    }

    pub async fn settled(&self) {
        self.controller.settled().await;
    }

    pub fn close(self, reason: ExitReason) {
        let Self {
            controller,
            peer_visibility,
        } = self;
        let awaiting = !controller.state().is_idle();

        drop(controller);
        peer_visibility.release();
        tracing::info!(%reason, awaiting, "conversation screen closed");
    }
}
