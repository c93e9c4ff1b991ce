//! Local mirror of the server's player list.
//!
//! The registry is mutated only by the session loop. Every mutation builds a
//! new map (copy-on-write through [`Arc::make_mut`]) and publishes it on a
//! `watch` channel, so readers on other tasks always hold a complete,
//! immutable snapshot and never a half-applied merge.

use std::collections::BTreeMap;
use std::sync::Arc;

use net64_net::{Player, PlayerId, PlayerUpdate};
use tokio::sync::watch;

/// Immutable view of all known players, ordered by id.
pub type PlayerMap = BTreeMap<PlayerId, Player>;

/// A delta referenced a player the registry does not know.
///
/// Non-fatal: the update is dropped and the registry is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("update for unknown player {player_id} ignored")]
pub struct UnknownPlayerUpdate {
    pub player_id: PlayerId,
}

/// What applying a delta did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// A complete patch introduced a new player.
    Joined(Player),
    /// Fields were merged into an existing player; carries the merged result.
    Changed(Player),
    /// The player was removed; carries its last known state.
    Left(Player),
}

/// Owner of the player mirror.
#[derive(Debug)]
pub struct PlayerRegistry {
    players: Arc<PlayerMap>,
    tx: watch::Sender<Arc<PlayerMap>>,
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerRegistry {
    pub fn new() -> Self {
        let players = Arc::new(PlayerMap::new());
        let (tx, _rx) = watch::channel(Arc::clone(&players));
        Self { players, tx }
    }

    /// Replace every player at once.
    ///
    /// Returns the equivalent ordered batch of updates: removals for players
    /// no longer present, then a full update per player in the snapshot.
    pub fn apply_snapshot(&mut self, players: Vec<Player>) -> Vec<PlayerUpdate> {
        let mut next = PlayerMap::new();
        for player in players {
            if let Some(previous) = next.insert(player.id, player) {
                tracing::warn!(player_id = previous.id, "Duplicate player id in snapshot, keeping the last entry");
            }
        }

        let mut batch: Vec<PlayerUpdate> = self
            .players
            .keys()
            .filter(|id| !next.contains_key(id))
            .map(|&id| PlayerUpdate::removed(id))
            .collect();
        batch.extend(next.values().map(PlayerUpdate::full));

        self.players = Arc::new(next);
        self.publish();
        tracing::debug!(players = self.players.len(), "Applied player snapshot");
        batch
    }

    /// Merge one delta.
    ///
    /// A removal deletes the player. A patch merges into the existing player,
    /// or creates it when the id is new and the patch is complete. Anything
    /// else for an unknown id is logged and ignored.
    pub fn apply_delta(&mut self, update: &PlayerUpdate) -> Result<DeltaOutcome, UnknownPlayerUpdate> {
        let player_id = update.player_id;
        let unknown = || {
            tracing::warn!(player_id, removal = update.is_removal(), "Ignoring update for unknown player");
            UnknownPlayerUpdate { player_id }
        };

        let outcome = match &update.patch {
            None => {
                if !self.players.contains_key(&player_id) {
                    return Err(unknown());
                }
                let players = Arc::make_mut(&mut self.players);
                match players.remove(&player_id) {
                    Some(player) => DeltaOutcome::Left(player),
                    None => return Err(unknown()),
                }
            }
            Some(patch) => {
                if self.players.contains_key(&player_id) {
                    let players = Arc::make_mut(&mut self.players);
                    match players.get_mut(&player_id) {
                        Some(player) => {
                            patch.apply_to(player);
                            DeltaOutcome::Changed(player.clone())
                        }
                        None => return Err(unknown()),
                    }
                } else {
                    let player = patch.to_player(player_id).ok_or_else(unknown)?;
                    Arc::make_mut(&mut self.players).insert(player_id, player.clone());
                    DeltaOutcome::Joined(player)
                }
            }
        };

        self.publish();
        Ok(outcome)
    }

    /// Point-in-time immutable copy.
    pub fn snapshot(&self) -> Arc<PlayerMap> {
        Arc::clone(&self.players)
    }

    /// Receiver that always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<PlayerMap>> {
        self.tx.subscribe()
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Forget every player.
    pub fn clear(&mut self) {
        if self.players.is_empty() {
            return;
        }
        self.players = Arc::new(PlayerMap::new());
        self.publish();
    }

    fn publish(&self) {
        self.tx.send_replace(Arc::clone(&self.players));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use net64_net::PlayerPatch;

    fn names(map: &PlayerMap) -> Vec<(PlayerId, &str)> {
        map.values().map(|p| (p.id, p.username.as_str())).collect()
    }

    fn registry_with(players: &[(PlayerId, &str)]) -> PlayerRegistry {
        let mut registry = PlayerRegistry::new();
        registry.apply_snapshot(players.iter().map(|&(id, name)| Player::new(id, name)).collect());
        registry
    }

    #[test]
    fn test_snapshot_replaces_everything() {
        let mut registry = registry_with(&[(1, "A"), (2, "B")]);
        let batch = registry.apply_snapshot(vec![Player::new(2, "B2"), Player::new(5, "E")]);

        assert_eq!(names(&registry.snapshot()), [(2, "B2"), (5, "E")]);
        assert_eq!(batch[0], PlayerUpdate::removed(1));
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_delta_merges_changed_fields() {
        let mut registry = registry_with(&[(1, "A")]);
        let outcome = registry
            .apply_delta(&PlayerUpdate::changed(
                1,
                PlayerPatch {
                    state: Some(vec![9, 9]),
                    ..Default::default()
                },
            ))
            .unwrap();

        let player = registry.get(1).unwrap();
        assert_eq!(player.username, "A");
        assert_eq!(player.state, vec![9, 9]);
        assert_eq!(outcome, DeltaOutcome::Changed(player.clone()));
    }

    #[test]
    fn test_removal_then_join() {
        let mut registry = registry_with(&[(1, "A"), (2, "B")]);

        let left = registry.apply_delta(&PlayerUpdate::removed(2)).unwrap();
        assert_eq!(left, DeltaOutcome::Left(Player::new(2, "B")));

        let joined = registry.apply_delta(&PlayerUpdate::full(&Player::new(3, "C"))).unwrap();
        assert_eq!(joined, DeltaOutcome::Joined(Player::new(3, "C")));

        assert_eq!(names(&registry.snapshot()), [(1, "A"), (3, "C")]);
    }

    #[test]
    fn test_unknown_id_never_changes_size() {
        let mut registry = registry_with(&[(1, "A")]);
        let partial = PlayerUpdate::changed(
            7,
            PlayerPatch {
                username: Some("ghost".to_string()),
                ..Default::default()
            },
        );

        for update in [partial, PlayerUpdate::removed(7)] {
            let err = registry.apply_delta(&update).unwrap_err();
            assert_eq!(err, UnknownPlayerUpdate { player_id: 7 });
            assert_eq!(registry.len(), 1);
        }
    }

    #[test]
    fn test_deltas_equal_net_snapshot() {
        let deltas = [
            PlayerUpdate::full(&Player::new(1, "A")),
            PlayerUpdate::full(&Player::new(2, "B")),
            PlayerUpdate::changed(
                1,
                PlayerPatch {
                    character_id: Some(3),
                    ..Default::default()
                },
            ),
            PlayerUpdate::removed(2),
            PlayerUpdate::full(&Player::new(4, "D")),
            PlayerUpdate::changed(
                4,
                PlayerPatch {
                    username: Some("D2".to_string()),
                    state: Some(vec![1]),
                    ..Default::default()
                },
            ),
        ];
        let mut incremental = PlayerRegistry::new();
        for delta in &deltas {
            incremental.apply_delta(delta).unwrap();
        }

        let mut a = Player::new(1, "A");
        a.character_id = 3;
        let mut d = Player::new(4, "D2");
        d.state = vec![1];
        let mut wholesale = PlayerRegistry::new();
        wholesale.apply_snapshot(vec![a, d]);

        assert_eq!(incremental.snapshot(), wholesale.snapshot());
    }

    #[test]
    fn test_snapshot_is_immutable_copy() {
        let mut registry = registry_with(&[(1, "A")]);
        let before = registry.snapshot();
        let rx = registry.subscribe();

        registry.apply_delta(&PlayerUpdate::removed(1)).unwrap();

        assert_eq!(names(&before), [(1, "A")]);
        assert!(registry.snapshot().is_empty());
        assert!(rx.borrow().is_empty());
    }

    #[test]
    fn test_clear_publishes_empty_map() {
        let mut registry = registry_with(&[(1, "A"), (2, "B")]);
        let rx = registry.subscribe();
        registry.clear();
        assert!(registry.is_empty());
        assert!(rx.borrow().is_empty());
    }
}
