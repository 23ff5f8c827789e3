use std::sync::Arc;

/// Clocked behaviour shared by every simulated component.
pub trait ModuleBehaviors {
    /// Advance the component by one cycle.
    fn tick_one(&mut self);

    /// Clear per-iteration state (usually statistics) without disturbing contents.
    fn reset(&mut self);
}

pub trait Parameterizable {
    type ConfigType;

    fn conf(&self) -> &Self::ConfigType;

    fn init_conf(&mut self, conf: Arc<Self::ConfigType>);
}
