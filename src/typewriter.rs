/// Tick-driven prefix reveal for incoming message text.
///
/// Advanced by the app's tick event; reveals `speed` characters per tick
/// until the full target is visible, then stops reporting progress.
/// Retargeting to a different string starts the reveal over from zero.
#[derive(Debug, Clone)]
pub struct Typewriter {
    target: String,
    revealed: usize,
    speed: usize,
}

impl Typewriter {
    pub fn new(target: impl Into<String>, speed: usize) -> Self {
        Self {
            target: target.into(),
            revealed: 0,
            speed: speed.max(1),
        }
    }

    /// Swap in a new target string. A different target resets the reveal;
    /// the same target is a no-op so streamed re-deliveries don't flicker.
    pub fn retarget(&mut self, target: &str) {
        if target != self.target {
            self.target = target.to_string();
            self.revealed = 0;
        }
    }

    /// Advance one tick. Returns true if more text became visible.
    pub fn tick(&mut self) -> bool {
        let total = self.target.chars().count();
        if self.revealed >= total {
            return false;
        }
        self.revealed = (self.revealed + self.speed).min(total);
        true
    }

    /// The currently revealed prefix, always on a char boundary.
    pub fn visible(&self) -> &str {
        match self.target.char_indices().nth(self.revealed) {
            Some((byte_idx, _)) => &self.target[..byte_idx],
            None => &self.target,
        }
    }

    pub fn is_done(&self) -> bool {
        self.revealed >= self.target.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reveals_one_char_per_tick() {
        let mut tw = Typewriter::new("hello", 1);
        assert_eq!(tw.visible(), "");

        for expected in ["h", "he", "hel", "hell"] {
            assert!(tw.tick());
            assert_eq!(tw.visible(), expected);
        }
    }

    #[test]
    fn test_stabilizes_after_completion() {
        let mut tw = Typewriter::new("hello", 1);
        for _ in 0..5 {
            assert!(tw.tick());
        }
        assert_eq!(tw.visible(), "hello");
        assert!(tw.is_done());

        // Further ticks report no progress and reveal nothing new.
        assert!(!tw.tick());
        assert_eq!(tw.visible(), "hello");
    }

    #[test]
    fn test_speed_clamps_to_target_length() {
        let mut tw = Typewriter::new("ok", 10);
        assert!(tw.tick());
        assert_eq!(tw.visible(), "ok");
        assert!(tw.is_done());
    }

    #[test]
    fn test_retarget_resets_reveal() {
        let mut tw = Typewriter::new("first", 1);
        tw.tick();
        tw.tick();
        assert_eq!(tw.visible(), "fi");

        tw.retarget("second");
        assert_eq!(tw.visible(), "");
        tw.tick();
        assert_eq!(tw.visible(), "s");

        // Retargeting to the identical string keeps progress.
        tw.retarget("second");
        assert_eq!(tw.visible(), "s");
    }

    #[test]
    fn test_multibyte_prefix_stays_on_char_boundary() {
        let mut tw = Typewriter::new("héllo", 1);
        tw.tick();
        tw.tick();
        assert_eq!(tw.visible(), "hé");
    }
}
