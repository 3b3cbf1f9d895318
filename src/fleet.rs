//! Fleet partition and reclassification (§3, §4.5.2).
//!
//! The fleet is an insertion-ordered collection of backend servers, each
//! tagged `always_on` or `reserve`. `m` — the reserve count the policy
//! search returns — determines how many members currently hold the
//! `reserve` role; reclassification promotes or demotes members in
//! iteration order while preserving identity.

use crate::model::{FleetMember, Role};

/// The insertion-ordered set of backend servers the controller owns.
#[derive(Debug, Clone, Default)]
pub struct Fleet {
    members: Vec<FleetMember>,
}

/// Result of a reclassification pass: the ids that changed role, in the
/// order they were reclassified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reclassification {
    pub promoted: Vec<String>, // reserve -> always_on
    pub demoted: Vec<String>,  // always_on -> reserve
}

impl Reclassification {
    fn none() -> Self {
        Reclassification {
            promoted: Vec::new(),
            demoted: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.promoted.is_empty() && self.demoted.is_empty()
    }
}

impl Fleet {
    pub fn new() -> Self {
        Fleet { members: Vec::new() }
    }

    /// Builds a fleet of `n` members, assigning the first `m` (in
    /// insertion order) to `reserve` and the rest to `always_on`, matching
    /// the original fleet-initialization split.
    pub fn init(ids: impl IntoIterator<Item = (String, String)>, m: u32) -> Self {
        let mut members: Vec<FleetMember> = ids
            .into_iter()
            .map(|(id, address)| FleetMember::new(id, address, Role::AlwaysOn))
            .collect();
        for member in members.iter_mut().take(m as usize) {
            member.role = Role::Reserve;
        }
        Fleet { members }
    }

    pub fn members(&self) -> &[FleetMember] {
        &self.members
    }

    pub fn reserve_count(&self) -> u32 {
        self.members.iter().filter(|m| m.role == Role::Reserve).count() as u32
    }

    pub fn always_on_ids(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.role == Role::AlwaysOn)
            .map(|m| m.id.as_str())
            .collect()
    }

    pub fn reserve_ids(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.role == Role::Reserve)
            .map(|m| m.id.as_str())
            .collect()
    }

    /// Reclassifies members so that exactly `m_new` hold the `reserve`
    /// role, promoting or demoting in insertion order and preserving
    /// identity. Returns the ids whose role changed.
    pub fn reclassify(&mut self, m_new: u32) -> Reclassification {
        let m_old = self.reserve_count() as i64;
        let mut diff = m_old - m_new as i64; // positive: promote reserves to always_on

        if diff == 0 {
            return Reclassification::none();
        }

        let mut result = Reclassification::none();
        if diff > 0 {
            for member in self.members.iter_mut() {
                if member.role == Role::Reserve && diff > 0 {
                    member.role = Role::AlwaysOn;
                    diff -= 1;
                    result.promoted.push(member.id.clone());
                }
            }
        } else {
            for member in self.members.iter_mut() {
                if member.role == Role::AlwaysOn && diff < 0 {
                    member.role = Role::Reserve;
                    diff += 1;
                    result.demoted.push(member.id.clone());
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet_of(n: u32, m: u32) -> Fleet {
        Fleet::init(
            (0..n).map(|i| (format!("srv{i}"), format!("10.0.0.{i}:80"))),
            m,
        )
    }

    #[test]
    fn init_assigns_first_m_to_reserve() {
        let f = fleet_of(10, 3);
        assert_eq!(f.reserve_count(), 3);
        assert_eq!(f.reserve_ids(), vec!["srv0", "srv1", "srv2"]);
    }

    #[test]
    fn reclassify_promotes_reserves_to_always_on_in_order() {
        // Scenario F: m goes from 6 to 4, promoting 2 members.
        let mut f = fleet_of(10, 6);
        let result = f.reclassify(4);
        assert_eq!(result.promoted, vec!["srv0", "srv1"]);
        assert!(result.demoted.is_empty());
        assert_eq!(f.reserve_count(), 4);
    }

    #[test]
    fn reclassify_demotes_always_on_to_reserve_in_order() {
        let mut f = fleet_of(10, 2);
        let result = f.reclassify(5);
        assert_eq!(result.demoted, vec!["srv2", "srv3", "srv4"]);
        assert!(result.promoted.is_empty());
        assert_eq!(f.reserve_count(), 5);
    }

    #[test]
    fn reclassify_no_change_is_a_no_op() {
        let mut f = fleet_of(10, 4);
        let result = f.reclassify(4);
        assert!(result.is_empty());
        assert_eq!(f.reserve_count(), 4);
    }
}
