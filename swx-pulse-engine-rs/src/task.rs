//! Embassy glue for running the engine on a board.
//!
//! Both loops are regular `async fn`s, **not** Embassy `#[task]`s. Embassy
//! tasks cannot be generic, so the firmware wraps each in a thin concrete
//! task:
//!
//! ```ignore
//! static SIGNALS: Signals = Signals::new();
//!
//! #[embassy_executor::task]
//! async fn engine_task(
//!     engine: &'static SharedEngine<QueuedOutput<16>>,
//!     lines: BoardTriggerLines,
//! ) {
//!     control_loop_task(engine, lines, Duration::from_micros(100)).await;
//! }
//!
//! #[embassy_executor::task]
//! async fn trigger1_task(pin: Input<'static>) {
//!     trigger_edge_task(pin, &SIGNALS).await;
//! }
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Ticker};
use embedded_hal_async::digital::Wait;

use crate::engine::Engine;
use crate::output::{AudioProcessor, NotifyLine, Output, TriggerLines};
use crate::state::Signals;

/// Engine shared between the control loop and other tasks (bus transport,
/// calibration).
pub type SharedEngine<O, A = (), N = ()> = Mutex<CriticalSectionRawMutex, Engine<'static, O, A, N>>;

/// Current time on the engine's free-running 32-bit microsecond counter.
pub fn now_us() -> u32 {
    // Truncation is the wrap the engine's deadline compares expect.
    Instant::now().as_micros() as u32
}

/// Tick the engine every `period`.
///
/// The mutex is held only for the tick itself. The trigger lines are read
/// inside the tick, after the edge flag is cleared.
pub async fn control_loop_task<O, A, N, L>(engine: &'static SharedEngine<O, A, N>, mut lines: L, period: Duration)
where
    O: Output,
    A: AudioProcessor,
    N: NotifyLine,
    L: TriggerLines,
{
    #[cfg(feature = "defmt")]
    defmt::info!("control loop started, period {} us", period.as_micros());

    let mut ticker = Ticker::every(period);
    loop {
        ticker.next().await;

        let mut guard = engine.lock().await;
        guard.tick(now_us(), &mut lines);
    }
}

/// Raise the trigger signal on every edge of `pin`.
///
/// One instance per trigger input. Returns if the pin reports an error.
pub async fn trigger_edge_task<P: Wait>(mut pin: P, signals: &'static Signals) {
    loop {
        if pin.wait_for_any_edge().await.is_err() {
            #[cfg(feature = "defmt")]
            defmt::error!("trigger input failed, edge watch stopped");
            return;
        }
        signals.triggers.raise();
    }
}
