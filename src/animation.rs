use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AnimationError;

/// The closed set of animations the engine knows how to run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AnimationKind {
    Blink,
    MarqueeLeft,
    MarqueeRight,
}

impl AnimationKind {
    pub fn name(self) -> &'static str {
        match self {
            AnimationKind::Blink => "blink",
            AnimationKind::MarqueeLeft => "marquee_left",
            AnimationKind::MarqueeRight => "marquee_right",
        }
    }

    /// Time between two steps.
    ///
    /// For a blink the duration is the flip period itself. Marquees sweep one
    /// peripheral per step, so the duration is a full sweep and gets divided
    /// by the number of peripherals.
    pub fn step_interval(self, duration: Duration, count: usize) -> Duration {
        match self {
            AnimationKind::Blink => duration,
            AnimationKind::MarqueeLeft | AnimationKind::MarqueeRight => {
                duration / u32::try_from(count.max(1)).unwrap_or(u32::MAX)
            }
        }
    }
}

impl FromStr for AnimationKind {
    type Err = AnimationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blink" => Ok(AnimationKind::Blink),
            "marquee_left" => Ok(AnimationKind::MarqueeLeft),
            "marquee_right" => Ok(AnimationKind::MarqueeRight),
            other => Err(AnimationError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for AnimationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
enum Phase {
    Blink { on: bool },
    Marquee { cursor: usize, previous: Option<usize> },
}

/// A stateful step generator over `count` peripherals.
///
/// Each call to [`Animation::step`] returns the writes to perform, in order.
/// It never touches a peripheral itself.
#[derive(Debug)]
pub struct Animation {
    kind: AnimationKind,
    count: usize,
    phase: Phase,
}

impl Animation {
    pub fn new(kind: AnimationKind, count: usize) -> Self {
        let phase = match kind {
            AnimationKind::Blink => Phase::Blink { on: true },
            AnimationKind::MarqueeLeft => Phase::Marquee {
                cursor: 0,
                previous: None,
            },
            AnimationKind::MarqueeRight => Phase::Marquee {
                cursor: count.saturating_sub(1),
                previous: None,
            },
        };

        Animation { kind, count, phase }
    }

    pub fn kind(&self) -> AnimationKind {
        self.kind
    }

    pub fn step(&mut self) -> Vec<(usize, bool)> {
        if self.count == 0 {
            return Vec::new();
        }

        match &mut self.phase {
            Phase::Blink { on } => {
                let writes = (0..self.count).map(|i| (i, *on)).collect();
                *on = !*on;
                writes
            }
            Phase::Marquee { cursor, previous } => {
                let mut writes = Vec::with_capacity(2);
                if let Some(previous) = previous {
                    writes.push((*previous, false));
                }
                writes.push((*cursor, true));

                *previous = Some(*cursor);
                *cursor = match self.kind {
                    AnimationKind::MarqueeRight if *cursor == 0 => self.count - 1,
                    AnimationKind::MarqueeRight => *cursor - 1,
                    _ => (*cursor + 1) % self.count,
                };

                writes
            }
        }
    }
}
