//! Registry of running combats
//!
//! The engine does no locking of its own. Each combat here sits behind its
//! own mutex, so calls against one combat are serialized while different
//! combats proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::state::{Combat, CombatId};

#[derive(Debug, Default)]
pub struct CombatManager {
    combats: RwLock<HashMap<CombatId, Arc<Mutex<Combat>>>>,
}

impl CombatManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared instance
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a combat, replacing any previous one with the same id
    pub fn insert(&self, combat: Combat) -> CombatId {
        let id = combat.id();
        self.combats.write().insert(id, Arc::new(Mutex::new(combat)));
        debug!("Registered combat {}", id);
        id
    }

    /// Unregister a combat and hand it back
    ///
    /// Returns `None` if the id is unknown. If another caller still holds
    /// the combat's handle, the current state is cloned out.
    pub fn remove(&self, id: CombatId) -> Option<Combat> {
        let handle = self.combats.write().remove(&id)?;
        debug!("Unregistered combat {}", id);
        Some(match Arc::try_unwrap(handle) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => shared.lock().clone(),
        })
    }

    pub fn contains(&self, id: CombatId) -> bool {
        self.combats.read().contains_key(&id)
    }

    pub fn ids(&self) -> Vec<CombatId> {
        self.combats.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.combats.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.combats.read().is_empty()
    }

    /// Handle to a single combat's lock
    pub fn handle(&self, id: CombatId) -> Option<Arc<Mutex<Combat>>> {
        self.combats.read().get(&id).cloned()
    }

    /// Run `f` with exclusive access to a combat
    ///
    /// The registry lock is released before `f` runs; only the combat's own
    /// lock is held.
    pub fn with_combat<R>(&self, id: CombatId, f: impl FnOnce(&mut Combat) -> R) -> Option<R> {
        let handle = self.handle(id)?;
        let mut combat = handle.lock();
        Some(f(&mut combat))
    }

    /// Clone of a combat's current state
    pub fn snapshot(&self, id: CombatId) -> Option<Combat> {
        self.with_combat(id, |combat| combat.clone())
    }

    /// Drop every combat that is no longer active, returning their ids
    pub fn prune_finished(&self) -> Vec<CombatId> {
        let mut combats = self.combats.write();
        let finished: Vec<CombatId> = combats
            .iter()
            .filter(|(_, combat)| !combat.lock().is_active())
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            combats.remove(id);
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::combat::{Combatant, CombatEngine, ScriptedDice};

    fn combat() -> Combat {
        let mut engine = CombatEngine::new(ScriptedDice::new([10, 12]));
        engine
            .start_combat(
                "session",
                vec![Combatant::new("A", 10, 10), Combatant::new("B", 10, 10)],
            )
            .unwrap()
    }

    #[test]
    fn test_insert_and_mutate() {
        let manager = CombatManager::new();
        let id = manager.insert(combat());
        assert!(manager.contains(id));

        let round = manager.with_combat(id, |c| {
            c.round += 1;
            c.round()
        });
        assert_eq!(round, Some(2));
        assert_eq!(manager.snapshot(id).unwrap().round(), 2);

        let removed = manager.remove(id).unwrap();
        assert_eq!(removed.round(), 2);
        assert!(manager.is_empty());
        assert!(manager.with_combat(id, |_| ()).is_none());
    }

    #[test]
    fn test_parallel_turns_are_serialized() {
        let manager = CombatManager::shared();
        let id = manager.insert(combat());

        let workers: Vec<_> = (0..8)
            .map(|seed| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    let mut engine = CombatEngine::seeded(seed);
                    for _ in 0..25 {
                        manager.with_combat(id, |c| engine.next_turn(c));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        // 200 turns over two combatants starting at index 0: 100 full rounds
        let combat = manager.snapshot(id).unwrap();
        assert_eq!(combat.round(), 101);
        assert_eq!(combat.current_turn(), 0);
    }

    #[test]
    fn test_prune_finished() {
        let manager = CombatManager::new();
        let running = manager.insert(combat());
        let done = manager.insert(combat());
        manager.with_combat(done, |c| c.end());

        assert_eq!(manager.prune_finished(), vec![done]);
        assert!(manager.contains(running));
        assert!(!manager.contains(done));
    }
}
