//! Cooperative pipeline harness.
//!
//! Owns the process-wide router, player manager, profile service and
//! feedback hub, created once at boot in that order, and drives each
//! registered sink's pull-apply-emit cycle from the cooperative tick. Every
//! step returns promptly; the real-time worker never runs through here.

use crate::drivers::{InputDriver, InputRegistry};
use crate::feedback::FeedbackHub;
use crate::players::{PlayerManager, PlayerPolicy};
use crate::profile::{self, ProfileService, SocdMemory};
use crate::router::{Router, RouterConfig, MAX_PLAYERS};
use crate::sink::OutputSink;

/// Pipeline construction parameters.
#[derive(Clone, Copy)]
pub struct PipelineConfig {
    pub router: RouterConfig,
    pub policy: PlayerPolicy,
    pub max_players: usize,
    pub assign_on_press: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            policy: PlayerPolicy::Fixed,
            max_players: MAX_PLAYERS,
            assign_on_press: false,
        }
    }
}

/// The process-scoped core, passed explicitly to drivers and the shell.
pub struct Pipeline<'a> {
    pub router: Router<'a>,
    pub players: PlayerManager,
    pub profiles: ProfileService,
    pub feedback: FeedbackHub,
    pub registry: InputRegistry,
    socd: [[SocdMemory; MAX_PLAYERS]; crate::router::OutputTarget::COUNT],
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(config: PipelineConfig, drivers: &'static [InputDriver]) -> Self {
        Self {
            router: Router::new(config.router),
            players: PlayerManager::new(config.policy, config.max_players, config.assign_on_press),
            profiles: ProfileService::new(),
            feedback: FeedbackHub::new(),
            registry: InputRegistry::new(drivers),
            socd: [[SocdMemory::default(); MAX_PLAYERS]; crate::router::OutputTarget::COUNT],
        }
    }

    /// One cooperative tick: expiry, mouse drain, sink pulls, feedback
    /// hand-off to input drivers.
    pub fn tick(&mut self, now_ms: u64, sinks: &mut [&mut dyn OutputSink]) {
        self.players.expire_stale(now_ms);
        self.router.tick();

        for sink in sinks.iter_mut() {
            if !sink.is_ready() {
                continue;
            }
            let target = sink.target();
            for player in 0..target.max_players() {
                let Some(event) = self.router.get_output(target, player) else {
                    continue;
                };
                if player == 0 {
                    self.profiles.combo_tick(target, event.buttons, now_ms);
                }
                let profile = *self.profiles.get_active(target);
                let out = profile::apply(
                    &profile,
                    event.buttons,
                    &event.analog,
                    &mut self.socd[target as usize][player],
                );
                match sink.send_report(player, &event, &out) {
                    Ok(Some(fb)) => {
                        self.feedback.publish(target, player, &self.players, fb);
                    }
                    Ok(None) => {}
                    Err(_e) => {
                        // A stuck sink only affects itself; the router keeps
                        // serving the others.
                        #[cfg(feature = "defmt")]
                        defmt::debug!("sink error: {:?}", _e);
                    }
                }
            }
        }

        self.registry.tick(&mut self.feedback);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::buttons::Buttons;
    use crate::drivers::hid_gamepad;
    use crate::event::{Axis, InputEvent};
    use crate::feedback::Feedback;
    use crate::profile::{MapEntry, MapTarget, Profile, ProfileOutput, ProfileSet};
    use crate::router::{OutputTarget, SourceClass};
    use crate::sink::{OutputSink, SinkError};

    use std::vec::Vec;

    struct MockSink {
        target: OutputTarget,
        ready: bool,
        sent: Vec<(usize, Buttons, [u8; 7])>,
        feedback: Option<Feedback>,
    }

    impl MockSink {
        fn new(target: OutputTarget) -> Self {
            Self {
                target,
                ready: true,
                sent: Vec::new(),
                feedback: None,
            }
        }
    }

    impl OutputSink for MockSink {
        fn target(&self) -> OutputTarget {
            self.target
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        fn send_report(
            &mut self,
            player: usize,
            _event: &InputEvent,
            out: &ProfileOutput,
        ) -> Result<Option<Feedback>, SinkError> {
            self.sent.push((player, out.buttons, out.analog));
            Ok(self.feedback.take())
        }
    }

    static DRIVERS: [crate::drivers::InputDriver; 1] = [hid_gamepad::DRIVER];
    static REMAP_PROFILES: [Profile; 1] = [{
        let mut p = Profile::IDENTITY;
        p.button_map[0] = Some(MapEntry {
            input: Buttons::B1,
            target: MapTarget::To(Buttons::B2),
        });
        p
    }];

    #[test]
    fn test_report_flows_end_to_end() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), &DRIVERS);
        pipeline
            .router
            .add_route(SourceClass::Usb, OutputTarget::UsbDevice, 0);
        pipeline.profiles.init(
            OutputTarget::UsbDevice,
            ProfileSet {
                profiles: &REMAP_PROFILES,
                default_index: 0,
                switch_combo: ProfileSet::DEFAULT_SWITCH_COMBO,
            },
        );
        pipeline
            .registry
            .on_mount(0x1209, 0x0001, 0x01, 0, &mut pipeline.players, 0);

        // B1 pressed, LX deflected.
        let raw = [0x01, 0x00, 8, 200, 128, 128, 128, 0, 0];
        pipeline.registry.on_report(
            0x01,
            0,
            &raw,
            &mut pipeline.router,
            &mut pipeline.players,
            0,
        );

        let mut sink = MockSink::new(OutputTarget::UsbDevice);
        let mut sinks: [&mut dyn OutputSink; 1] = [&mut sink];
        pipeline.tick(10, &mut sinks);

        assert_eq!(sink.sent.len(), 1);
        let (player, buttons, analog) = sink.sent[0];
        assert_eq!(player, 0);
        assert_eq!(buttons, Buttons::B2);
        assert_eq!(analog[Axis::Lx as usize], 200);
    }

    #[test]
    fn test_sink_feedback_reaches_driver_scratch() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), &DRIVERS);
        pipeline
            .router
            .add_route(SourceClass::Usb, OutputTarget::UsbDevice, 0);
        pipeline
            .registry
            .on_mount(0x1209, 0x0001, 0x01, 0, &mut pipeline.players, 0);
        let raw = [0x00, 0x00, 8, 128, 128, 128, 128, 0, 0];
        pipeline.registry.on_report(
            0x01,
            0,
            &raw,
            &mut pipeline.router,
            &mut pipeline.players,
            0,
        );

        let mut sink = MockSink::new(OutputTarget::UsbDevice);
        sink.feedback = Some(Feedback {
            rumble_left: 77,
            ..Default::default()
        });
        let mut sinks: [&mut dyn OutputSink; 1] = [&mut sink];
        pipeline.tick(10, &mut sinks);

        let pending = pipeline.registry.take_pending_feedback(0x01, 0).unwrap();
        assert_eq!(pending.rumble_left, 77);
    }

    #[test]
    fn test_not_ready_sink_is_skipped() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), &DRIVERS);
        pipeline
            .router
            .add_route(SourceClass::Usb, OutputTarget::UsbDevice, 0);
        pipeline
            .registry
            .on_mount(0x1209, 0x0001, 0x01, 0, &mut pipeline.players, 0);
        let raw = [0x01, 0x00, 8, 128, 128, 128, 128, 0, 0];
        pipeline.registry.on_report(
            0x01,
            0,
            &raw,
            &mut pipeline.router,
            &mut pipeline.players,
            0,
        );

        let mut sink = MockSink::new(OutputTarget::UsbDevice);
        sink.ready = false;
        let mut sinks: [&mut dyn OutputSink; 1] = [&mut sink];
        pipeline.tick(10, &mut sinks);
        assert!(sink.sent.is_empty());
    }
}
