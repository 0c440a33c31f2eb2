use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Appearance the peer region returns to when a conversational screen goes away.
///
/// The engine never reads these fields; it hands the value back to the host verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    pub height: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
    pub border_radius: f32,
    pub background_color: String,
    pub border_top_width: f32,
    pub border_top_color: String,
    pub shadow_color: String,
    pub shadow_offset_x: f32,
    pub shadow_offset_y: f32,
    pub shadow_opacity: f32,
    pub shadow_radius: f32,
    pub elevation: f32,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            height: 70.0,
            bottom: 20.0,
            left: 20.0,
            right: 20.0,
            border_radius: 15.0,
            background_color: "#ffffff".to_string(),
            border_top_width: 0.0,
            border_top_color: "transparent".to_string(),
            shadow_color: "#000000".to_string(),
            shadow_offset_x: 0.0,
            shadow_offset_y: 10.0,
            shadow_opacity: 0.25,
            shadow_radius: 3.5,
            elevation: 5.0,
        }
    }
}

/// Shared chrome owned by the host shell, such as a tab bar.
pub trait PeerRegion: Send + Sync {
    fn set_hidden(&self);
    fn set_visible(&self, config: &VisibilityConfig);
}

/// Keeps the peer region hidden for as long as it lives.
///
/// Acquiring hides the region once; releasing or dropping restores it once, whichever
/// exit path the owning screen takes.
#[must_use = "dropping the guard restores the peer region immediately"]
pub struct PeerVisibilityGuard {
    region: Arc<dyn PeerRegion>,
    restore: VisibilityConfig,
    released: bool,
}

impl PeerVisibilityGuard {
    pub fn acquire(region: Arc<dyn PeerRegion>, restore: VisibilityConfig) -> Self {
        region.set_hidden();
        tracing::debug!("peer region hidden");
        Self {
            region,
            restore,
            released: false,
        }
    }

    pub fn restore_config(&self) -> &VisibilityConfig {
        &self.restore
    }

    pub fn release(mut self) {
        self.restore_once();
    }

    fn restore_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.region.set_visible(&self.restore);
        tracing::debug!("peer region restored");
    }
}

impl Drop for PeerVisibilityGuard {
    fn drop(&mut self) {
        self.restore_once();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum RegionCall {
        Hidden,
        Visible(VisibilityConfig),
    }

    /// Peer region that records every call it receives.
    #[derive(Default)]
    pub(crate) struct RecordingRegion {
        calls: Mutex<Vec<RegionCall>>,
    }

    impl RecordingRegion {
        pub(crate) fn calls(&self) -> Vec<RegionCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PeerRegion for RecordingRegion {
        fn set_hidden(&self) {
            self.calls.lock().unwrap().push(RegionCall::Hidden);
        }

        fn set_visible(&self, config: &VisibilityConfig) {
            self.calls
                .lock()
                .unwrap()
                .push(RegionCall::Visible(config.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{RecordingRegion, RegionCall};
    use super::*;

    fn custom_config() -> VisibilityConfig {
        VisibilityConfig {
            height: 64.0,
            background_color: "#101820".to_string(),
            ..VisibilityConfig::default()
        }
    }

    #[test]
    fn acquire_hides_once_and_drop_restores_once() {
        let region = Arc::new(RecordingRegion::default());

        let guard = PeerVisibilityGuard::acquire(region.clone(), custom_config());
        assert_eq!(region.calls(), vec![RegionCall::Hidden]);

        drop(guard);
        assert_eq!(
            region.calls(),
            vec![RegionCall::Hidden, RegionCall::Visible(custom_config())]
        );
    }

    #[test]
    fn explicit_release_does_not_restore_twice() {
        let region = Arc::new(RecordingRegion::default());

        PeerVisibilityGuard::acquire(region.clone(), custom_config()).release();

        assert_eq!(
            region.calls(),
            vec![RegionCall::Hidden, RegionCall::Visible(custom_config())]
        );
    }

    #[test]
    fn unwinding_still_restores() {
        let region = Arc::new(RecordingRegion::default());
        let region_for_panic = region.clone();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = PeerVisibilityGuard::acquire(region_for_panic, custom_config());
            panic!("screen crashed while mounted");
        }));

        assert!(outcome.is_err());
        assert_eq!(
            region.calls(),
            vec![RegionCall::Hidden, RegionCall::Visible(custom_config())]
        );
    }

    #[test]
    fn config_deserializes_with_defaults_for_missing_fields() {
        let config: VisibilityConfig =
            serde_json::from_str(r##"{ "height": 56.0, "background_color": "#222" }"##).unwrap();

        assert_eq!(config.height, 56.0);
        assert_eq!(config.background_color, "#222");
        assert_eq!(config.border_radius, VisibilityConfig::default().border_radius);
    }
}
