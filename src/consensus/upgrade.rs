//! Upgrade detector
//!
//! Tracks the height at which blocks switch to the next major version.
//! The height is either fixed by the currency or decided by miners: once
//! the threshold share of a voting window of blocks carries the voting
//! minor version, the upgrade happens a fixed distance later.

use tracing::{error, info};

use crate::constants::{BLOCK_MINOR_VERSION_1, UNDEF_HEIGHT};

use super::currency::Currency;

/// Read access to the (major, minor) versions of main-chain blocks
pub trait VersionHistory {
    fn block_count(&self) -> u32;
    fn block_version(&self, height: u32) -> Option<(u8, u8)>;
}

impl VersionHistory for [(u8, u8)] {
    fn block_count(&self) -> u32 {
        self.len() as u32
    }

    fn block_version(&self, height: u32) -> Option<(u8, u8)> {
        self.get(height as usize).copied()
    }
}

impl VersionHistory for Vec<(u8, u8)> {
    fn block_count(&self) -> u32 {
        self.as_slice().block_count()
    }

    fn block_version(&self, height: u32) -> Option<(u8, u8)> {
        self.as_slice().block_version(height)
    }
}

#[derive(Debug, Clone)]
pub struct UpgradeDetector {
    target_version: u8,
    fixed_upgrade_height: u32,
    voting_threshold: u32,
    voting_window: u32,
    upgrade_window: u32,
    max_upgrade_distance: u32,
    blocks_per_hour: u32,
    voting_complete_height: u32,
}

impl UpgradeDetector {
    pub fn new(currency: &Currency, target_version: u8) -> Self {
        Self {
            target_version,
            fixed_upgrade_height: currency.upgrade_height(target_version),
            voting_threshold: currency.upgrade_voting_threshold(),
            voting_window: currency.upgrade_voting_window(),
            upgrade_window: currency.upgrade_window(),
            max_upgrade_distance: currency.max_upgrade_distance(),
            blocks_per_hour: (60 * 60 / currency.difficulty_target()).max(1) as u32,
            voting_complete_height: UNDEF_HEIGHT,
        }
    }

    pub fn target_version(&self) -> u8 {
        self.target_version
    }

    pub fn voting_complete_height(&self) -> u32 {
        self.voting_complete_height
    }

    fn previous_version(&self) -> u8 {
        self.target_version - 1
    }

    fn is_voted(&self) -> bool {
        self.fixed_upgrade_height == UNDEF_HEIGHT
    }

    /// Last height still produced with the previous version
    pub fn upgrade_height(&self) -> u32 {
        if !self.is_voted() {
            self.fixed_upgrade_height
        } else if self.voting_complete_height == UNDEF_HEIGHT {
            UNDEF_HEIGHT
        } else {
            self.voting_complete_height.saturating_add(self.upgrade_window)
        }
    }

    /// Recover the voting state from stored blocks and check that their
    /// versions agree with the schedule
    pub fn init<H: VersionHistory + ?Sized>(&mut self, chain: &H) -> bool {
        let count = chain.block_count();
        let last_version = match count.checked_sub(1).and_then(|h| chain.block_version(h)) {
            Some((major, _)) => major,
            None => {
                self.voting_complete_height = UNDEF_HEIGHT;
                return true;
            }
        };

        if self.is_voted() {
            if last_version == self.previous_version() {
                self.voting_complete_height = self.find_voting_complete_height(chain, count - 1);
            } else if last_version >= self.target_version {
                let first_upgraded = (0..count).find(|h| {
                    chain.block_version(*h).map_or(false, |(major, _)| major >= self.target_version)
                });
                let upgrade_height = match first_upgraded {
                    Some(h) if chain.block_version(h).map(|v| v.0) == Some(self.target_version) => h,
                    _ => {
                        error!(target_version = self.target_version, "Upgrade height isn't found");
                        return false;
                    }
                };
                self.voting_complete_height = self.find_voting_complete_height(chain, upgrade_height);
                if self.voting_complete_height == UNDEF_HEIGHT {
                    error!(upgrade_height, "Voting complete height isn't found");
                    return false;
                }
            } else {
                self.voting_complete_height = UNDEF_HEIGHT;
            }
            return true;
        }

        let upgrade_height = self.fixed_upgrade_height;
        if count <= upgrade_height.saturating_add(1) {
            if last_version >= self.target_version {
                error!(height = count - 1, version = last_version, "Block has invalid version");
                return false;
            }
        } else {
            let at = chain.block_version(upgrade_height).map(|v| v.0);
            if at != Some(self.previous_version()) {
                error!(height = upgrade_height, version = ?at, "Block has invalid version");
                return false;
            }
            let after = chain.block_version(upgrade_height + 1).map(|v| v.0);
            if after != Some(self.target_version) {
                error!(height = upgrade_height + 1, version = ?after, "Block has invalid version");
                return false;
            }
        }
        true
    }

    /// Tick after a block was appended to `chain`
    pub fn block_pushed<H: VersionHistory + ?Sized>(&mut self, chain: &H) {
        let count = chain.block_count();
        let Some(last) = count.checked_sub(1) else {
            error!("Upgrade detector ticked on an empty chain");
            return;
        };
        let last_version = chain.block_version(last).map(|v| v.0).unwrap_or_default();

        if !self.is_voted() {
            let expected_upgraded = count > self.fixed_upgrade_height.saturating_add(1);
            if expected_upgraded != (last_version >= self.target_version) {
                error!(height = last, version = last_version, "Block version does not follow the upgrade schedule");
            }
        } else if self.voting_complete_height != UNDEF_HEIGHT {
            let upgrade_height = self.upgrade_height();
            if count <= upgrade_height {
                if count % self.blocks_per_hour == 0 {
                    info!(
                        upgrade_height,
                        blocks_left = upgrade_height - count + 1,
                        "Upgrade is going to happen"
                    );
                }
            } else if count == upgrade_height.saturating_add(1) {
                info!(from_height = upgrade_height + 1, version = self.target_version, "Upgrade has happened");
            }
        } else if self.is_voting_complete(chain, last) {
            self.voting_complete_height = last;
            info!(height = last, upgrade_height = self.upgrade_height(), "Upgrade voting complete");
        }
    }

    /// Tick after the last block was removed from `chain`
    pub fn block_popped<H: VersionHistory + ?Sized>(&mut self, chain: &H) {
        if self.voting_complete_height != UNDEF_HEIGHT && chain.block_count() == self.voting_complete_height {
            info!(height = self.voting_complete_height, "Upgrade has been canceled");
            self.voting_complete_height = UNDEF_HEIGHT;
        }
    }

    /// Votes within the window ending at `height`
    pub fn number_of_votes<H: VersionHistory + ?Sized>(&self, chain: &H, height: u32) -> u32 {
        if height + 1 < self.voting_window {
            return 0;
        }
        (height + 1 - self.voting_window..=height)
            .filter(|h| chain.block_version(*h) == Some((self.previous_version(), BLOCK_MINOR_VERSION_1)))
            .count() as u32
    }

    fn is_voting_complete<H: VersionHistory + ?Sized>(&self, chain: &H, height: u32) -> bool {
        let votes = self.number_of_votes(chain, height) as u64;
        self.voting_threshold as u64 * self.voting_window as u64 <= 100 * votes
    }

    fn find_voting_complete_height<H: VersionHistory + ?Sized>(&self, chain: &H, probable_upgrade_height: u32) -> u32 {
        let start = probable_upgrade_height.saturating_sub(self.max_upgrade_distance);
        (start..=probable_upgrade_height)
            .find(|h| self.is_voting_complete(chain, *h))
            .unwrap_or(UNDEF_HEIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::CurrencyBuilder;
    use crate::constants::{BLOCK_MAJOR_VERSION_1, BLOCK_MAJOR_VERSION_2};

    const V1: (u8, u8) = (BLOCK_MAJOR_VERSION_1, 0);
    const VOTE: (u8, u8) = (BLOCK_MAJOR_VERSION_1, BLOCK_MINOR_VERSION_1);
    const V2: (u8, u8) = (BLOCK_MAJOR_VERSION_2, 0);

    fn voting_currency() -> Currency {
        CurrencyBuilder::new().upgrade_voting(90, 10, 5).build().unwrap()
    }

    fn push(detector: &mut UpgradeDetector, chain: &mut Vec<(u8, u8)>, version: (u8, u8)) {
        chain.push(version);
        detector.block_pushed(chain.as_slice());
    }

    #[test]
    fn test_voting_completes_and_schedules_upgrade() {
        let currency = voting_currency();
        let mut detector = UpgradeDetector::new(&currency, BLOCK_MAJOR_VERSION_2);
        let mut chain = vec![V1];
        assert!(detector.init(&chain));

        for _ in 0..8 {
            push(&mut detector, &mut chain, VOTE);
        }
        assert_eq!(detector.voting_complete_height(), UNDEF_HEIGHT);

        push(&mut detector, &mut chain, VOTE);
        // Blocks 1..=9 vote: 9 of the window 0..=9
        assert_eq!(detector.voting_complete_height(), 9);
        assert_eq!(detector.upgrade_height(), 14);

        chain.pop();
        detector.block_popped(&chain);
        assert_eq!(detector.voting_complete_height(), UNDEF_HEIGHT);
    }

    #[test]
    fn test_init_recovers_voting_state() {
        let currency = voting_currency();
        let mut chain = vec![V1];
        chain.extend(std::iter::repeat(VOTE).take(9));
        chain.extend(std::iter::repeat(V1).take(5));
        chain.push(V2);

        let mut detector = UpgradeDetector::new(&currency, BLOCK_MAJOR_VERSION_2);
        assert!(detector.init(&chain));
        assert_eq!(detector.voting_complete_height(), 9);
        assert_eq!(detector.upgrade_height(), 14);
    }

    #[test]
    fn test_init_rejects_upgrade_without_votes() {
        let currency = voting_currency();
        let chain = vec![V1, V1, V2];
        let mut detector = UpgradeDetector::new(&currency, BLOCK_MAJOR_VERSION_2);
        assert!(!detector.init(&chain));
    }

    #[test]
    fn test_fixed_upgrade_height() {
        let currency = CurrencyBuilder::new().upgrade_height_v2(2).build().unwrap();
        let mut detector = UpgradeDetector::new(&currency, BLOCK_MAJOR_VERSION_2);
        assert_eq!(detector.upgrade_height(), 2);

        assert!(detector.init(&vec![V1, V1, V1, V2]));
        assert!(!detector.init(&vec![V1, V1, V2]));
        assert!(!detector.init(&vec![V1, V1, V1, V1]));
        assert!(detector.init(&vec![V1, V1]));
    }

    #[test]
    fn test_votes_counted_over_window() {
        let currency = voting_currency();
        let detector = UpgradeDetector::new(&currency, BLOCK_MAJOR_VERSION_2);
        let chain: Vec<(u8, u8)> = (0..20).map(|i| if i % 2 == 0 { VOTE } else { V1 }).collect();
        assert_eq!(detector.number_of_votes(&chain, 8), 0);
        assert_eq!(detector.number_of_votes(&chain, 9), 5);
        assert_eq!(detector.number_of_votes(&chain, 19), 5);
    }
}
