use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::animation::{Animation, AnimationKind};
use crate::error::{AnimationError, LinkError};
use crate::link::{Connector, PeripheralLink};

struct Running {
    animation: Animation,
    ticker: Interval,
}

/// Runs at most one animation at a time.
///
/// The engine owns the ticker of the running animation. Dropping the
/// animation drops its ticker, so nothing can fire after [`stop`] returns.
///
/// [`stop`]: AnimationEngine::stop
#[derive(Default)]
pub struct AnimationEngine {
    running: Option<Running>,
}

impl AnimationEngine {
    pub fn new() -> Self {
        AnimationEngine { running: None }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    #[cfg(test)]
    pub fn kind(&self) -> Option<AnimationKind> {
        self.running.as_ref().map(|r| r.animation.kind())
    }

    #[cfg(test)]
    pub fn step_interval(&self) -> Option<Duration> {
        self.running.as_ref().map(|r| r.ticker.period())
    }

    /// Replaces whatever is running with a new animation.
    ///
    /// Nothing changes if the kind or the duration are invalid. Otherwise the
    /// previous animation is stopped, the first step is applied right away and
    /// the next one is due one step interval later.
    pub async fn start<C: Connector>(
        &mut self,
        link: &mut PeripheralLink<C>,
        kind: &str,
        duration: Duration,
    ) -> Result<(), AnimationError> {
        let kind: AnimationKind = kind.parse()?;
        let count = link.count()?;

        if count == 0 {
            return Err(AnimationError::NoPeripherals);
        }

        let step_interval = kind.step_interval(duration, count);
        if step_interval.is_zero() {
            return Err(AnimationError::InvalidDuration);
        }
        // The ticker must be able to schedule at least two steps ahead
        Instant::now()
            .checked_add(step_interval)
            .and_then(|first| first.checked_add(step_interval))
            .ok_or(AnimationError::InvalidDuration)?;

        self.stop(link).await?;

        let mut animation = Animation::new(kind, count);
        apply(link, animation.step()).await?;

        let mut ticker = time::interval_at(Instant::now() + step_interval, step_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!("Started {} animation with a step every {:?}", kind, step_interval);

        self.running = Some(Running { animation, ticker });

        Ok(())
    }

    /// Cancels the ticker and turns every peripheral off. Does nothing when
    /// nothing is running.
    pub async fn stop<C: Connector>(&mut self, link: &mut PeripheralLink<C>) -> Result<(), LinkError> {
        if let Some(running) = self.running.take() {
            log::info!("Stopping {} animation", running.animation.kind());
            link.set_all(false).await?;
        }

        Ok(())
    }

    /// Forgets the running animation without touching the peripherals.
    ///
    /// Used once the link is gone and no write could reach them anyway.
    pub fn abandon(&mut self) -> bool {
        self.running.take().is_some()
    }

    /// Resolves when the next step is due. Never resolves while stopped.
    pub async fn tick_due(&mut self) {
        match self.running.as_mut() {
            Some(running) => {
                running.ticker.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Applies one step of the running animation.
    pub async fn tick<C: Connector>(&mut self, link: &mut PeripheralLink<C>) -> Result<(), LinkError> {
        let writes = match self.running.as_mut() {
            Some(running) => running.animation.step(),
            None => return Ok(()),
        };

        log::trace!("Animation step {:?}", writes);

        apply(link, writes).await
    }
}

async fn apply<C: Connector>(link: &mut PeripheralLink<C>, writes: Vec<(usize, bool)>) -> Result<(), LinkError> {
    for (index, on) in writes {
        match link.set(index, on).await {
            Err(LinkError::Unavailable) => return Err(LinkError::Unavailable),
            Err(e) => log::warn!("Dropped write of peripheral {}: {}", index, e),
            Ok(()) => (),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Board, MemoryConnector};

    async fn connected(count: usize) -> (Board, PeripheralLink<MemoryConnector>) {
        let board = Board::with_count(count);
        let mut link = PeripheralLink::new(MemoryConnector::new(board.clone()));
        link.connect().await.unwrap();
        (board, link)
    }

    #[tokio::test(start_paused = true)]
    async fn first_step_is_immediate() {
        let (board, mut link) = connected(4).await;
        let mut engine = AnimationEngine::new();

        engine.start(&mut link, "marquee_left", Duration::from_secs(2)).await.unwrap();

        assert!(engine.is_running());
        assert_eq!(engine.step_interval(), Some(Duration::from_millis(500)));
        assert_eq!(board.leds(), vec![true, false, false, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_step_interval() {
        let (board, mut link) = connected(3).await;
        let mut engine = AnimationEngine::new();
        let started = Instant::now();

        engine.start(&mut link, "blink", Duration::from_millis(300)).await.unwrap();
        assert_eq!(board.leds(), vec![true; 3]);

        engine.tick_due().await;
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        engine.tick(&mut link).await.unwrap();
        assert_eq!(board.leds(), vec![false; 3]);

        engine.tick_due().await;
        assert_eq!(started.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test]
    async fn rejects_bad_arguments_without_writing() {
        let (board, mut link) = connected(2).await;
        let mut engine = AnimationEngine::new();

        assert_eq!(
            engine.start(&mut link, "twinkle", Duration::from_secs(1)).await,
            Err(AnimationError::UnknownKind("twinkle".to_string()))
        );
        assert_eq!(
            engine.start(&mut link, "blink", Duration::ZERO).await,
            Err(AnimationError::InvalidDuration)
        );
        assert_eq!(
            engine.start(&mut link, "blink", Duration::MAX).await,
            Err(AnimationError::InvalidDuration)
        );
        assert!(!engine.is_running());
        assert!(board.writes().is_empty());
    }

    #[tokio::test]
    async fn empty_set_cannot_animate() {
        let (_board, mut link) = connected(0).await;
        let mut engine = AnimationEngine::new();

        assert_eq!(
            engine.start(&mut link, "marquee_right", Duration::from_secs(1)).await,
            Err(AnimationError::NoPeripherals)
        );
    }

    #[tokio::test]
    async fn stop_turns_everything_off() {
        for kind in &["blink", "marquee_left", "marquee_right"] {
            for ticks in 0..5 {
                let (board, mut link) = connected(4).await;
                let mut engine = AnimationEngine::new();

                engine.start(&mut link, kind, Duration::from_secs(1)).await.unwrap();
                for _ in 0..ticks {
                    engine.tick(&mut link).await.unwrap();
                }
                engine.stop(&mut link).await.unwrap();

                assert!(!engine.is_running());
                assert_eq!(board.leds(), vec![false; 4], "{} after {} ticks", kind, ticks);
            }
        }
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (board, mut link) = connected(2).await;
        let mut engine = AnimationEngine::new();

        engine.stop(&mut link).await.unwrap();
        assert!(board.writes().is_empty());
    }

    #[tokio::test]
    async fn restart_leaves_nothing_behind() {
        let (board, mut link) = connected(4).await;
        let mut engine = AnimationEngine::new();

        engine.start(&mut link, "blink", Duration::from_secs(1)).await.unwrap();
        engine.start(&mut link, "marquee_right", Duration::from_secs(4)).await.unwrap();

        assert_eq!(engine.kind(), Some(AnimationKind::MarqueeRight));
        assert_eq!(board.leds(), vec![false, false, false, true]);
    }

    #[tokio::test]
    async fn tick_after_stop_does_nothing() {
        let (board, mut link) = connected(2).await;
        let mut engine = AnimationEngine::new();

        engine.start(&mut link, "blink", Duration::from_secs(1)).await.unwrap();
        engine.stop(&mut link).await.unwrap();
        board.clear_writes();

        engine.tick(&mut link).await.unwrap();
        assert!(board.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refused_write_does_not_stop_animation() {
        let (board, mut link) = connected(3).await;
        let mut engine = AnimationEngine::new();
        board.refuse_writes_to(1);

        engine.start(&mut link, "marquee_left", Duration::from_secs(3)).await.unwrap();
        for _ in 0..2 {
            engine.tick_due().await;
            engine.tick(&mut link).await.unwrap();
        }

        assert!(engine.is_running());
        assert!(link.is_connected());
        assert_eq!(board.leds(), vec![false, false, true]);
        assert_eq!(board.writes(), vec![(0, true), (0, false), (2, true)]);

        // The sweep on stop skips the refused peripheral too
        board.clear_writes();
        engine.stop(&mut link).await.unwrap();
        assert!(link.is_connected());
        assert_eq!(board.writes(), vec![(0, false), (2, false)]);
    }

    #[tokio::test]
    async fn tick_reports_lost_link() {
        let (board, mut link) = connected(2).await;
        let mut engine = AnimationEngine::new();

        engine.start(&mut link, "blink", Duration::from_secs(1)).await.unwrap();
        board.set_online(false);

        assert_eq!(engine.tick(&mut link).await, Err(LinkError::Unavailable));
        assert!(engine.abandon());
        assert!(!engine.is_running());
    }
}
