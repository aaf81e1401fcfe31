//! Per-user intimacy with a persona: a levelled XP counter.
//!
//! Every level takes [`XP_PER_LEVEL`] experience points. Levels run from
//! [`MIN_LEVEL`] to [`MAX_LEVEL`]; once the top level is reached the XP bar
//! stops one point short of a level-up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const XP_PER_LEVEL: u32 = 100;
pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 99;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intimacy {
  pub user_id:    String,
  pub persona_id: String,
  pub level:      u8,
  /// Progress inside the current level, always `< XP_PER_LEVEL`.
  pub xp:         u32,
  pub updated_at: DateTime<Utc>,
}

/// Level before and after an XP mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
  pub from: u8,
  pub to:   u8,
}

impl LevelChange {
  pub fn leveled_up(&self) -> bool { self.to > self.from }
}

impl Intimacy {
  pub fn new(user_id: impl Into<String>, persona_id: impl Into<String>) -> Self {
    Self {
      user_id:    user_id.into(),
      persona_id: persona_id.into(),
      level:      MIN_LEVEL,
      xp:         0,
      updated_at: Utc::now(),
    }
  }

  /// Experience accumulated since level 1.
  pub fn total_xp(&self) -> u32 {
    u32::from(self.level - MIN_LEVEL) * XP_PER_LEVEL + self.xp
  }

  /// Fraction of the current level completed, in `0.0..1.0`.
  pub fn progress(&self) -> f32 { self.xp as f32 / XP_PER_LEVEL as f32 }

  pub fn gain(&mut self, amount: u32) -> LevelChange {
    let from = self.level;
    let total = self.total_xp().saturating_add(amount);
    self.set_total(total);
    self.updated_at = Utc::now();
    LevelChange { from, to: self.level }
  }

  pub fn lose(&mut self, amount: u32) -> LevelChange {
    let from = self.level;
    let total = self.total_xp().saturating_sub(amount);
    self.set_total(total);
    self.updated_at = Utc::now();
    LevelChange { from, to: self.level }
  }

  fn set_total(&mut self, total: u32) {
    let max_total = u32::from(MAX_LEVEL - MIN_LEVEL) * XP_PER_LEVEL + (XP_PER_LEVEL - 1);
    let total = total.min(max_total);
    // `total / XP_PER_LEVEL` is at most MAX_LEVEL - MIN_LEVEL after the clamp.
    self.level = MIN_LEVEL + (total / XP_PER_LEVEL) as u8;
    self.xp = total % XP_PER_LEVEL;
  }
}
