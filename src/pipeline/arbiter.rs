/// Round-robin grant selection. Each call grants up to `width` eligible
/// requesters starting after the last one granted.
#[derive(Debug, Clone, Default)]
pub struct RoundRobin {
    rr_cursor: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> usize {
        self.rr_cursor
    }

    pub fn select(&mut self, eligible: &[bool], width: usize) -> Vec<bool> {
        let n = eligible.len();
        let mut grants = vec![false; n];
        if n == 0 || width == 0 {
            return grants;
        }

        let mut granted = 0usize;
        let start = self.rr_cursor % n;
        for offset in 0..n {
            let idx = (start + offset) % n;
            if eligible[idx] {
                grants[idx] = true;
                granted += 1;
                self.rr_cursor = (idx + 1) % n;
                if granted >= width {
                    break;
                }
            }
        }
        grants
    }

    /// Single-grant convenience.
    pub fn pick(&mut self, eligible: &[bool]) -> Option<usize> {
        self.select(eligible, 1).iter().position(|&g| g)
    }
}
