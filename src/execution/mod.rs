// Trading loop, cooldown gate and shutdown plumbing
pub mod cooldown;
pub mod shutdown;
pub mod trading_loop;

pub use cooldown::CooldownTracker;
pub use shutdown::{shutdown_channel, ShutdownHandle, ShutdownSignal};
pub use trading_loop::{
    Clock, CycleOutcome, ExecutionLoop, LoopSettings, LoopState, SystemClock,
};
