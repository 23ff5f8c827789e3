use std::fmt;
use std::sync::{Arc, OnceLock};

use log::error;

use crate::base::behavior::*;
use crate::timeq::Cycle;

#[derive(Debug)]
pub struct ModuleBase<T, C> {
    pub name: String,
    pub cycle: Cycle,
    pub state: T,
    pub config: OnceLock<Arc<C>>,
}

impl<T: Default, C> Default for ModuleBase<T, C> {
    fn default() -> Self {
        Self {
            name: String::new(),
            cycle: 0,
            state: T::default(),
            config: OnceLock::new(),
        }
    }
}

impl<T, C> ModuleBase<T, C> {
    pub fn named(name: impl Into<String>, state: T) -> Self {
        Self {
            name: name.into(),
            cycle: 0,
            state,
            config: OnceLock::new(),
        }
    }

    /// Abort on a broken internal invariant, reporting this component and its clock.
    pub fn internal_error(&self, addr: Option<u64>, args: fmt::Arguments<'_>) -> ! {
        internal_error(&self.name, self.cycle, addr, args)
    }
}

/// Internal-consistency violations are bugs in the bookkeeping, never recoverable.
pub fn internal_error(component: &str, cycle: Cycle, addr: Option<u64>, args: fmt::Arguments<'_>) -> ! {
    let msg = match addr {
        Some(addr) => format!("[{component}] tick {cycle} addr {addr:#x}: {args}"),
        None => format!("[{component}] tick {cycle}: {args}"),
    };
    error!("{msg}");
    panic!("internal consistency violation: {msg}");
}

pub trait IsModule: ModuleBehaviors {
    type StateType;
    type ConfigType;

    fn base(&mut self) -> &mut ModuleBase<Self::StateType, Self::ConfigType>;

    fn base_ref(&self) -> &ModuleBase<Self::StateType, Self::ConfigType>;

    fn state_mut(&mut self) -> &mut Self::StateType {
        &mut self.base().state
    }

    fn state(&self) -> &Self::StateType {
        &self.base_ref().state
    }

    fn name(&self) -> &str {
        &self.base_ref().name
    }

    fn now(&self) -> Cycle {
        self.base_ref().cycle
    }
}

impl<X> Parameterizable for X where X: IsModule {
    type ConfigType = X::ConfigType;

    fn conf(&self) -> &Self::ConfigType {
        self.base_ref().config.get().expect("config not found, was `init_conf` called in `new`?")
    }

    fn init_conf(&mut self, conf: Arc<Self::ConfigType>) {
        self.base().config.set(Arc::clone(&conf)).map_err(|_| "config already set").unwrap();
    }
}

/// arguments: identifier, state type, config type, additional methods
macro_rules! module {
    ($comp:ident, $T:ty, $C:ty, $($method:item)*) => {
        impl IsModule for $comp {
            type StateType = $T;
            type ConfigType = $C;

            fn base(&mut self) -> &mut ModuleBase<$T, $C> {
                &mut self.base
            }

            fn base_ref(&self) -> &ModuleBase<$T, $C> {
                &self.base
            }

            $($method)*
        }
    };
}

pub(crate) use module;
