// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared leash state and the movement rule derived from it.

use parking_lot::Mutex;
use std::sync::Arc;

/// Grab transition observed by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabPhase {
    /// The leash is held.
    Grabbing,
    /// The leash was let go since the last tick.
    Released,
    Idle,
}

/// Inputs written by the inbound handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LeashState {
    pub z_positive: f32,
    pub z_negative: f32,
    pub x_positive: f32,
    pub x_negative: f32,
    pub stretch: f32,
    pub grabbed: bool,
    was_grabbed: bool,
}

/// Values read in one critical section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeashSample {
    pub vertical: f32,
    pub horizontal: f32,
    pub phase: GrabPhase,
}

impl LeashState {
    /// Compute the axes and advance the grab edge detector.
    pub fn sample(&mut self) -> LeashSample {
        let vertical = (self.z_positive - self.z_negative) * self.stretch;
        let horizontal = (self.x_positive - self.x_negative) * self.stretch;

        if self.grabbed {
            self.was_grabbed = true;
        }
        let released = self.grabbed != self.was_grabbed;
        if released {
            self.was_grabbed = false;
        }

        let phase = if self.grabbed {
            GrabPhase::Grabbing
        } else if released {
            GrabPhase::Released
        } else {
            GrabPhase::Idle
        };

        LeashSample {
            vertical,
            horizontal,
            phase,
        }
    }
}

/// Leash input written by an inbound handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeashField {
    ZPositive,
    ZNegative,
    XPositive,
    XNegative,
    Stretch,
}

/// Lock-protected [`LeashState`] shared by handlers and the control loop.
#[derive(Debug, Clone, Default)]
pub struct LeashHandle(Arc<Mutex<LeashState>>);

impl LeashHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&self) -> LeashSample {
        self.0.lock().sample()
    }

    pub fn stretch(&self) -> f32 {
        self.0.lock().stretch
    }

    pub fn set_float(&self, field: LeashField, value: f32) {
        let mut state = self.0.lock();
        match field {
            LeashField::ZPositive => state.z_positive = value,
            LeashField::ZNegative => state.z_negative = value,
            LeashField::XPositive => state.x_positive = value,
            LeashField::XNegative => state.x_negative = value,
            LeashField::Stretch => state.stretch = value,
        }
    }

    pub fn set_grabbed(&self, grabbed: bool) {
        self.0.lock().grabbed = grabbed;
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> LeashState {
        *self.0.lock()
    }
}

/// Command sent to the peer's input endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Movement {
    pub vertical: f32,
    pub horizontal: f32,
    pub run: bool,
}

impl Movement {
    pub const STOP: Movement = Movement {
        vertical: 0.0,
        horizontal: 0.0,
        run: false,
    };
}

/// Movement for a held leash. Thresholds are strict.
pub fn classify(
    stretch: f32,
    vertical: f32,
    horizontal: f32,
    run_deadzone: f32,
    walk_deadzone: f32,
) -> Movement {
    if stretch > run_deadzone {
        Movement {
            vertical,
            horizontal,
            run: true,
        }
    } else if stretch > walk_deadzone {
        Movement {
            vertical,
            horizontal,
            run: false,
        }
    } else {
        Movement::STOP
    }
}
