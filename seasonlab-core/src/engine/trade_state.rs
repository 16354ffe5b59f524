//! Per window-year position state machine.
//!
//! ```text
//! Idle ──first day──▶ Active ──stop──▶ StoppedOut ──re-entry──▶ ReEntered
//!                       │                  │                      │
//!                       └──last day──▶ Closed ◀──last day─────────┤
//!                                          ▲                      │
//!                                          └────────stop──────────┘
//! ```
//!
//! `ReEntered` can only be reached from `StoppedOut`, and a stop while
//! `ReEntered` goes straight to `Closed`, so a window-year re-enters at most
//! once.

use crate::params::TradeRules;

/// Position state at a day's close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionState {
    Idle,
    Active { entry: f64 },
    StoppedOut { exit: f64 },
    ReEntered { entry: f64 },
    Closed,
}

/// What happened on the day that produced a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayAction {
    /// Bought at the close; no price return yet.
    Enter,
    /// Held through the day.
    Hold,
    /// Sold at the close after breaching the stop.
    StopOut,
    /// Bought again at the close after the re-entry trigger.
    ReEnter,
    /// Sold at the close on the window's last trading day.
    WindowEnd,
    /// No position during the day.
    Flat,
}

impl DayAction {
    /// Whether capital was exposed to this day's price move or costs.
    pub fn in_market(self) -> bool {
        !matches!(self, DayAction::Flat)
    }
}

/// One trading day as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Day {
    pub close: f64,
    pub is_last: bool,
}

impl PositionState {
    pub fn holding(self) -> bool {
        matches!(self, PositionState::Active { .. } | PositionState::ReEntered { .. })
    }

    /// Apply one day. Pure: the same inputs always give the same transition.
    pub fn step(self, day: Day, rules: &TradeRules) -> (PositionState, DayAction) {
        use DayAction as A;
        use PositionState as S;

        let stop_hit = |entry: f64| {
            rules.stop_loss_enabled() && day.close <= entry * (1.0 - rules.stop_loss_pct / 100.0)
        };
        let reentry_hit = |exit: f64| {
            rules.reentry_enabled() && day.close <= exit * (1.0 - rules.reentry_pct / 100.0)
        };

        match self {
            S::Idle => (S::Active { entry: day.close }, A::Enter),
            S::Active { entry } if stop_hit(entry) => (S::StoppedOut { exit: day.close }, A::StopOut),
            S::Active { .. } if day.is_last => (S::Closed, A::WindowEnd),
            S::Active { entry } => (S::Active { entry }, A::Hold),
            S::StoppedOut { .. } if day.is_last => (S::Closed, A::Flat),
            S::StoppedOut { exit } if reentry_hit(exit) => {
                (S::ReEntered { entry: day.close }, A::ReEnter)
            }
            S::StoppedOut { exit } => (S::StoppedOut { exit }, A::Flat),
            S::ReEntered { entry } if stop_hit(entry) => (S::Closed, A::StopOut),
            S::ReEntered { .. } if day.is_last => (S::Closed, A::WindowEnd),
            S::ReEntered { entry } => (S::ReEntered { entry }, A::Hold),
            S::Closed => (S::Closed, A::Flat),
        }
    }
}
