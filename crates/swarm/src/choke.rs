//! The choking algorithm: every choke interval, unchoke the top N
//! interested peers by download rate, plus one optimistic unchoke that
//! rotates periodically so new peers get a chance to prove themselves.

use std::collections::HashSet;
use std::hash::Hash;

use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct PeerSnapshot<P> {
    pub id: P,
    pub download_rate: f64,
    pub interested: bool,
}

/// Regular (non-optimistic) unchoke set: the `slots` interested peers with
/// the highest download rate. Uninterested peers are never unchoked
/// regardless of rate, since unchoking them wouldn't lead to any transfer.
fn top_by_rate<P: Clone + Eq + Hash>(peers: &[PeerSnapshot<P>], slots: usize) -> HashSet<P> {
    let mut interested: Vec<&PeerSnapshot<P>> = peers.iter().filter(|p| p.interested).collect();
    interested.sort_by(|a, b| b.download_rate.partial_cmp(&a.download_rate).unwrap_or(std::cmp::Ordering::Equal));
    interested.into_iter().take(slots).map(|p| p.id.clone()).collect()
}

pub struct ChokeManager<P> {
    slots: usize,
    optimistic_rotation_ticks: u32,
    optimistic: Option<P>,
    ticks_since_rotation: u32,
}

impl<P: Clone + Eq + Hash> ChokeManager<P> {
    pub fn new(slots: usize, optimistic_rotation_ticks: u32) -> Self {
        Self {
            slots,
            optimistic_rotation_ticks,
            optimistic: None,
            ticks_since_rotation: optimistic_rotation_ticks,
        }
    }

    /// Run one choke cycle, returning the set of peers that should be
    /// unchoked. Called once per `choke_interval` from the scheduler.
    pub fn tick(&mut self, peers: &[PeerSnapshot<P>], rng: &mut impl Rng) -> HashSet<P> {
        let mut unchoked = top_by_rate(peers, self.slots.saturating_sub(1));

        self.ticks_since_rotation += 1;
        let optimistic_still_valid = self
            .optimistic
            .as_ref()
            .is_some_and(|o| peers.iter().any(|p| &p.id == o && p.interested) && !unchoked.contains(o));

        if !optimistic_still_valid || self.ticks_since_rotation >= self.optimistic_rotation_ticks {
            let candidates: Vec<&PeerSnapshot<P>> = peers
                .iter()
                .filter(|p| p.interested && !unchoked.contains(&p.id))
                .collect();
            self.optimistic = candidates.choose(rng).map(|p| p.id.clone());
            self.ticks_since_rotation = 0;
        }

        if let Some(optimistic) = &self.optimistic {
            unchoked.insert(optimistic.clone());
        }
        unchoked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn snap(id: u32, rate: f64, interested: bool) -> PeerSnapshot<u32> {
        PeerSnapshot { id, download_rate: rate, interested }
    }

    #[test]
    fn unchokes_top_raters_and_never_uninterested_peers() {
        let mut mgr = ChokeManager::new(3, 3);
        let peers = vec![
            snap(1, 100.0, true),
            snap(2, 50.0, true),
            snap(3, 10.0, true),
            snap(4, 1000.0, false),
        ];
        let mut rng = StepRng::new(0, 1);
        let unchoked = mgr.tick(&peers, &mut rng);
        assert!(!unchoked.contains(&4));
        assert!(unchoked.contains(&1));
    }

    #[test]
    fn optimistic_rotates_after_configured_ticks() {
        let mut mgr = ChokeManager::new(1, 2);
        let peers = vec![snap(1, 0.0, true), snap(2, 0.0, true), snap(3, 0.0, true)];
        let mut rng = StepRng::new(0, 1);
        let first = mgr.tick(&peers, &mut rng);
        assert_eq!(first.len(), 1);
        // Within the rotation window the same optimistic peer should persist.
        let second = mgr.tick(&peers, &mut rng);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_peer_list_unchokes_nobody() {
        let mut mgr: ChokeManager<u32> = ChokeManager::new(4, 3);
        let mut rng = StepRng::new(0, 1);
        assert!(mgr.tick(&[], &mut rng).is_empty());
    }
}
