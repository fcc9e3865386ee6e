//! Per-run core completion bookkeeping.

/// Which cores have exhausted their budget, and their CPI at that point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreEndInfo {
    trapped: Vec<bool>,
    cpi: Vec<f64>,
    trapped_count: usize,
}

impl CoreEndInfo {
    #[must_use]
    pub fn new(num_cores: usize) -> Self {
        Self {
            trapped: vec![false; num_cores],
            cpi: vec![0.0; num_cores],
            trapped_count: 0,
        }
    }

    #[must_use]
    pub fn num_cores(&self) -> usize {
        self.trapped.len()
    }

    #[must_use]
    pub fn is_trapped(&self, core: usize) -> bool {
        self.trapped.get(core).copied().unwrap_or(false)
    }

    #[must_use]
    pub const fn trapped_count(&self) -> usize {
        self.trapped_count
    }

    #[must_use]
    pub fn cpi(&self) -> &[f64] {
        &self.cpi
    }

    /// True once every core is marked.
    #[must_use]
    pub fn all_trapped(&self) -> bool {
        !self.trapped.is_empty() && self.trapped_count == self.trapped.len()
    }

    /// Mark `core` trapped with its final CPI.
    ///
    /// Returns `false` (and changes nothing) if it was already marked. The
    /// recorded CPI never changes afterwards.
    pub fn mark(&mut self, core: usize, cpi: f64) -> bool {
        match self.trapped.get_mut(core) {
            Some(slot) if !*slot => {
                *slot = true;
                self.cpi[core] = cpi;
                self.trapped_count += 1;
                true
            }
            _ => false,
        }
    }

    /// Clear all marks for the next run.
    pub fn reset(&mut self) {
        self.trapped.fill(false);
        self.cpi.fill(0.0);
        self.trapped_count = 0;
    }

    /// Resize for a DUT with `num_cores` cores, clearing all marks.
    pub fn resize(&mut self, num_cores: usize) {
        self.trapped = vec![false; num_cores];
        self.cpi = vec![0.0; num_cores];
        self.trapped_count = 0;
    }
}
