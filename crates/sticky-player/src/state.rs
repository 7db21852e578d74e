use crate::protocol::PlayerView;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The only thing kept across runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistentState {
    pub volume: Option<f32>,
}

/// Holds the last published [`PlayerView`] for the socket and HTTP servers.
///
/// The event loop is the only writer.  Every publish bumps `rev`; a changed
/// volume is written to the state file.
pub struct StateManager {
    view: Arc<RwLock<PlayerView>>,
    state_file: PathBuf,
    persisted: RwLock<PersistentState>,
}

impl StateManager {
    pub fn new(state_file: PathBuf) -> Self {
        let persisted = Self::load_persistent(&state_file);
        Self {
            view: Arc::new(RwLock::new(PlayerView::default())),
            state_file,
            persisted: RwLock::new(persisted),
        }
    }

    pub fn arc(&self) -> Arc<RwLock<PlayerView>> {
        Arc::clone(&self.view)
    }

    pub async fn get_view(&self) -> PlayerView {
        self.view.read().await.clone()
    }

    /// Volume remembered from the previous run, if any.
    pub async fn persisted_volume(&self) -> Option<f32> {
        self.persisted
            .read()
            .await
            .volume
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 1.0))
    }

    /// Replace the published view.  Returns the new revision.
    pub async fn publish(&self, mut view: PlayerView) -> anyhow::Result<u64> {
        let volume = view.volume;
        let rev = {
            let mut current = self.view.write().await;
            view.rev = current.rev + 1;
            *current = view;
            current.rev
        };

        let changed = self.persisted.read().await.volume != Some(volume);
        if changed {
            self.persisted.write().await.volume = Some(volume);
            self.save().await?;
        }
        Ok(rev)
    }

    async fn save(&self) -> anyhow::Result<()> {
        let persistent = self.persisted.read().await.clone();

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> PersistentState {
        if let Ok(content) = std::fs::read_to_string(state_file) {
            if let Ok(persistent) = serde_json::from_str::<PersistentState>(&content) {
                return persistent;
            }
        }
        PersistentState::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_state_file(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("sticky-player-test-{}-{}", name, std::process::id()))
            .join("state.json")
    }

    #[tokio::test]
    async fn test_publish_bumps_rev_and_persists_volume() {
        let path = temp_state_file("publish");
        let _ = std::fs::remove_file(&path);

        let sm = StateManager::new(path.clone());
        assert_eq!(sm.persisted_volume().await, None);

        let rev1 = sm
            .publish(PlayerView {
                volume: 0.3,
                ..Default::default()
            })
            .await
            .unwrap();
        let rev2 = sm
            .publish(PlayerView {
                volume: 0.3,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!((rev1, rev2), (1, 2));
        assert_eq!(sm.get_view().await.rev, 2);

        let reloaded = StateManager::new(path.clone());
        assert_eq!(reloaded.persisted_volume().await, Some(0.3));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_state_file_is_ignored() {
        let path = temp_state_file("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        let sm = StateManager::new(path.clone());
        assert_eq!(sm.persisted_volume().await, None);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
