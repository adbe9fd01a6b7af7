use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::generator_state::GeneratorState;

struct Session {
    state: GeneratorState,
    last_seen: Instant,
}

/// One [`GeneratorState`] per open page. Nothing here outlives the process.
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            idle_timeout,
        }
    }

    pub fn create(&mut self) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(
            session_id.clone(),
            Session {
                state: GeneratorState::new(),
                last_seen: Instant::now(),
            },
        );
        log::debug!("session opened: {session_id} ({} open)", self.sessions.len());
        session_id
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut GeneratorState> {
        let session = self.sessions.get_mut(session_id.trim())?;
        session.last_seen = Instant::now();
        Some(&mut session.state)
    }

    pub fn remove(&mut self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id.trim()).is_some();
        if removed {
            log::debug!("session closed: {}", session_id.trim());
        }
        removed
    }

    /// Drops sessions untouched for longer than the idle timeout, except those
    /// still waiting on a generation.
    pub fn prune_idle(&mut self) -> usize {
        let before = self.sessions.len();
        let idle_timeout = self.idle_timeout;
        self.sessions.retain(|_, session| {
            session.state.is_loading() || session.last_seen.elapsed() <= idle_timeout
        });
        let pruned = before - self.sessions.len();
        if pruned > 0 {
            log::info!("pruned {pruned} idle session(s)");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::SessionStore;
    use crate::generator_state::{Action, Effect};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn sessions_are_independent() {
        let mut store = SessionStore::new(Duration::from_secs(60));
        let first = store.create();
        let second = store.create();
        assert_ne!(first, second);

        store
            .get_mut(&first)
            .expect("first session")
            .apply(Action::EditPrompt("a cat".to_string()));

        assert_eq!(store.get_mut(&first).expect("first").prompt(), "a cat");
        assert_eq!(store.get_mut(&second).expect("second").prompt(), "");
    }

    #[test]
    fn remove_and_unknown_ids() {
        let mut store = SessionStore::new(Duration::from_secs(60));
        let id = store.create();
        assert!(store.get_mut("missing").is_none());
        assert!(store.remove(&id));
        assert!(!store.remove(&id));
        assert!(store.is_empty());
    }

    #[test]
    fn prune_keeps_loading_sessions() {
        let mut store = SessionStore::new(Duration::ZERO);
        let idle = store.create();
        let busy = store.create();

        let state = store.get_mut(&busy).expect("busy session");
        state.apply(Action::EditPrompt("a cat".to_string()));
        assert!(matches!(state.apply(Action::Submit), Effect::Generate { .. }));

        thread::sleep(Duration::from_millis(5));
        assert_eq!(store.prune_idle(), 1);
        assert!(store.get_mut(&idle).is_none());
        assert!(store.get_mut(&busy).is_some());
        assert_eq!(store.len(), 1);
    }
}
