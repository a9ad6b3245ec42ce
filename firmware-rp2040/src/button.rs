//! Board button service: turns the single user button into click gestures.
//!
//! Apps bind the gestures to actions (start pairing, cycle output mode,
//! reset to the default mode, clear bonds).

use embassy_rp::gpio::Input;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, TimeoutError, Timer};

/// A classified press gesture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonEvent {
    Click,
    DoubleClick,
    TripleClick,
    Hold,
}

/// Gesture hand-off to whichever app task consumes the button.
pub type ButtonSignal = Signal<CriticalSectionRawMutex, ButtonEvent>;

/// Debounce interval after each edge.
const DEBOUNCE: Duration = Duration::from_millis(20);

/// A press this long is a hold.
const HOLD: Duration = Duration::from_millis(800);

/// Window for chaining clicks into multi-clicks.
const CHAIN: Duration = Duration::from_millis(300);

/// Sample the (active-low) button and publish gestures.
pub async fn run(mut pin: Input<'static>, events: &'static ButtonSignal) -> ! {
    loop {
        pin.wait_for_low().await;
        Timer::after(DEBOUNCE).await;

        // Hold fires as soon as the threshold passes, without waiting for
        // release.
        match with_timeout(HOLD, pin.wait_for_high()).await {
            Err(TimeoutError) => {
                events.signal(ButtonEvent::Hold);
                pin.wait_for_high().await;
                Timer::after(DEBOUNCE).await;
                continue;
            }
            Ok(()) => {}
        }

        // Count chained clicks.
        let mut clicks = 1u8;
        loop {
            match with_timeout(CHAIN, pin.wait_for_low()).await {
                Err(TimeoutError) => break,
                Ok(()) => {
                    Timer::after(DEBOUNCE).await;
                    pin.wait_for_high().await;
                    Timer::after(DEBOUNCE).await;
                    clicks = clicks.saturating_add(1);
                }
            }
        }

        events.signal(match clicks {
            1 => ButtonEvent::Click,
            2 => ButtonEvent::DoubleClick,
            _ => ButtonEvent::TripleClick,
        });
    }
}
