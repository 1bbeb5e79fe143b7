//! Slider-challenge remediation.
//!
//! A linear, constant-speed drag is exactly what the challenge's detector
//! expects from a bot, so the drag is replayed as many small moves with
//! jittered distance and timing. When motion simulation fails the solver
//! escalates: refresh and retry, then optical recognition if a recognizer is
//! configured, then a bounded wait for a human operator. It never hangs
//! indefinitely; the page is skipped once the ladder is exhausted.

use crate::classify::{self, PageClass};
use crate::config::{ClassifierConfig, SolverConfig};
use crate::error::CrawlError;
use crate::external::OcrRecognizer;
use crate::session::pool::PageHandle;
use fantoccini::actions::{InputSource, MouseActions, PointerAction, MOUSE_BUTTON_LEFT};
use fantoccini::Locator;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

const ENTER_KEY: &str = "\u{E007}";

pub struct ChallengeSolver {
    config: SolverConfig,
    classifier: ClassifierConfig,
    ocr: Option<Arc<dyn OcrRecognizer>>,
}

impl ChallengeSolver {
    pub fn new(
        config: SolverConfig,
        classifier: ClassifierConfig,
        ocr: Option<Arc<dyn OcrRecognizer>>,
    ) -> Self {
        Self {
            config,
            classifier,
            ocr,
        }
    }

    /// Attempts to clear the challenge currently shown on the page.
    ///
    /// Returns Ok once the page stops classifying as a challenge, or
    /// `ChallengeExhausted` after the full escalation ladder fails.
    pub async fn solve(&self, handle: &PageHandle) -> Result<(), CrawlError> {
        handle.activate().await?;

        for attempt in 1..=self.config.max_attempts {
            ::log::info!(
                "Slider attempt {}/{}",
                attempt,
                self.config.max_attempts
            );
            match self.drag_slider(handle).await {
                Ok(true) => {
                    tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
                    if self.passed(handle).await? {
                        ::log::info!("Slider challenge passed on attempt {}", attempt);
                        return Ok(());
                    }
                }
                Ok(false) => {
                    // No slider on the page; this challenge variant cannot be
                    // dragged, go straight to the escalation steps.
                    ::log::debug!("No slider handle found, skipping drag attempts");
                    break;
                }
                Err(e) if e.is_session_loss() => return Err(e),
                Err(e) => ::log::warn!("Slider drag failed: {}", e),
            }
            self.refresh(handle).await;
        }

        if self.ocr.is_some() {
            ::log::info!("Slider exhausted, trying optical recognition");
            if self.try_ocr(handle).await? {
                return Ok(());
            }
        }

        ::log::warn!(
            "Automatic remediation failed, waiting up to {}s for manual intervention",
            self.config.manual_wait_secs
        );
        if self.wait_for_manual(handle).await? {
            return Ok(());
        }

        Err(CrawlError::ChallengeExhausted {
            attempts: self.config.max_attempts,
        })
    }

    /// Replays a human-like drag across the slider: pointer to the handle
    /// center, press, 15-20 jittered moves over the configured distance with
    /// randomized per-step delay, release.
    async fn drag_slider(&self, handle: &PageHandle) -> Result<bool, CrawlError> {
        let sliders = handle
            .client
            .find_all(Locator::Css(&self.config.slider_selector))
            .await?;
        let Some(slider) = sliders.into_iter().next() else {
            return Ok(false);
        };

        let (x, y, w, h) = slider.rectangle().await?;
        let center_x = (x + w / 2.0) as i64;
        let center_y = (y + h / 2.0) as i64;

        // ThreadRng is not Send, so keep it scoped away from the awaits below
        let actions = {
            let mut rng = rand::thread_rng();
            let mut actions = MouseActions::new("mouse".to_string())
                .then(PointerAction::MoveTo {
                    duration: Some(Duration::from_millis(rng.gen_range(80..160))),
                    x: center_x,
                    y: center_y,
                })
                .then(PointerAction::Down {
                    button: MOUSE_BUTTON_LEFT,
                });

            let distance = self.config.drag_distance_px as i64;
            for dx in plan_drag(distance, self.config.drag_steps, &mut rng) {
                actions = actions.then(PointerAction::MoveBy {
                    duration: Some(Duration::from_millis(rng.gen_range(15..55))),
                    x: dx,
                    y: rng.gen_range(-2..=2),
                });
            }
            actions.then(PointerAction::Up {
                button: MOUSE_BUTTON_LEFT,
            })
        };

        handle.client.perform_actions(actions).await?;
        handle.client.release_actions().await?;
        Ok(true)
    }

    /// Success check: the wrapper's class gains the success marker.
    async fn passed(&self, handle: &PageHandle) -> Result<bool, CrawlError> {
        let wrappers = handle
            .client
            .find_all(Locator::Css(&self.config.wrapper_selector))
            .await?;
        for wrapper in wrappers {
            if let Some(class) = wrapper.attr("class").await? {
                if class.contains(&self.config.success_fragment) {
                    return Ok(true);
                }
            }
        }
        // The widget may remove itself entirely on success
        Ok(self.current_class(handle).await? != PageClass::Challenge)
    }

    /// Clicks the refresh control when present, resetting the challenge.
    async fn refresh(&self, handle: &PageHandle) {
        match handle
            .client
            .find_all(Locator::Css(&self.config.refresh_selector))
            .await
        {
            Ok(controls) => {
                if let Some(control) = controls.into_iter().next() {
                    if let Err(e) = control.click().await {
                        ::log::debug!("Challenge refresh click failed: {}", e);
                    } else {
                        ::log::debug!("Challenge refreshed");
                    }
                }
            }
            Err(e) => ::log::debug!("No refresh control: {}", e),
        }
    }

    /// Screenshot the challenge image, run it through the recognizer and
    /// submit the text. Returns true when the page stops being a challenge.
    async fn try_ocr(&self, handle: &PageHandle) -> Result<bool, CrawlError> {
        let Some(ocr) = &self.ocr else {
            return Ok(false);
        };

        let images = handle
            .client
            .find_all(Locator::Css(&self.config.image_selector))
            .await?;
        let Some(image) = images.into_iter().next() else {
            ::log::debug!("No challenge image to recognize");
            return Ok(false);
        };

        let png = image.screenshot().await?;
        let text = match ocr.recognize(&png).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return Ok(false),
            Err(e) => {
                ::log::warn!("Optical recognition failed: {}", e);
                return Ok(false);
            }
        };

        let inputs = handle
            .client
            .find_all(Locator::Css(&self.config.input_selector))
            .await?;
        let Some(input) = inputs.into_iter().next() else {
            return Ok(false);
        };
        input.send_keys(text.trim()).await?;
        input.send_keys(ENTER_KEY).await?;

        tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
        Ok(self.current_class(handle).await? != PageClass::Challenge)
    }

    /// Bounded window for a human operator to clear the challenge in the
    /// (headed) browser, polling classification until it changes or the
    /// window elapses.
    async fn wait_for_manual(&self, handle: &PageHandle) -> Result<bool, CrawlError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.manual_wait_secs);
        let poll = Duration::from_secs(self.config.manual_poll_secs.max(1));

        while Instant::now() < deadline {
            tokio::time::sleep(poll).await;
            if self.current_class(handle).await? != PageClass::Challenge {
                ::log::info!("Challenge cleared during manual window");
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn current_class(&self, handle: &PageHandle) -> Result<PageClass, CrawlError> {
        let html = handle.client.source().await?;
        Ok(classify::classify(&html, &self.classifier))
    }
}

/// Splits the drag distance into jittered forward steps that sum to exactly
/// the distance. Jitter must never make a step go backwards or push the total
/// past the distance; once the distance is covered the plan ends early.
fn plan_drag(distance: i64, steps: u32, rng: &mut impl Rng) -> Vec<i64> {
    let steps = steps.max(2) as i64;
    let base = distance / steps;
    let mut moves = Vec::with_capacity(steps as usize);
    let mut travelled = 0i64;

    for step in 0..steps {
        let remaining = distance - travelled;
        if remaining <= 0 {
            break;
        }
        let dx = if step == steps - 1 {
            remaining
        } else {
            (base + rng.gen_range(-3..=3)).clamp(1, remaining)
        };
        travelled += dx;
        moves.push(dx);
    }
    moves
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drag_plan_covers_exact_distance_without_backtracking() {
        let mut rng = rand::thread_rng();
        for distance in [5i64, 60, 300, 1000] {
            for _ in 0..50 {
                let moves = plan_drag(distance, 18, &mut rng);
                assert_eq!(moves.iter().sum::<i64>(), distance);
                assert!(
                    moves.iter().all(|&dx| dx > 0),
                    "backwards step in plan for {}: {:?}",
                    distance,
                    moves
                );
            }
        }
    }

    #[test]
    fn test_drag_plan_step_count_bounded() {
        let mut rng = rand::thread_rng();
        let moves = plan_drag(300, 18, &mut rng);
        assert!(!moves.is_empty());
        assert!(moves.len() <= 18);
    }
}
