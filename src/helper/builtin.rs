use std::any::Any;
use std::time::Duration;
use tracing::debug;

use super::{HelperContext, StepHelper};
use crate::target::TargetHandle;

/// Treats every target-typed parameter as an extra valid click target and
/// highlights all of them when guiding.
#[derive(Debug, Default)]
pub struct HighlightHelper {
    auxiliary: Vec<TargetHandle>,
}

impl StepHelper for HighlightHelper {
    fn name(&self) -> &'static str {
        "stepflow.helpers.Highlight"
    }

    fn init(&mut self, ctx: &mut HelperContext<'_>) -> anyhow::Result<()> {
        self.auxiliary = ctx
            .target_parameters()
            .filter(|handle| Some(*handle) != ctx.target)
            .collect();
        debug!(target: "helper",
            "Step {} highlight helper tracks {} auxiliary target(s)",
            ctx.step_index,
            self.auxiliary.len()
        );
        Ok(())
    }

    fn on_guide(&mut self, ctx: &mut HelperContext<'_>) {
        if let Some(target) = ctx.target {
            ctx.highlight(target);
        }
        for target in &self.auxiliary {
            ctx.highlight(*target);
        }
    }

    fn auxiliary_targets(&self) -> &[TargetHandle] {
        &self.auxiliary
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Timing knobs for a step.
///
/// Parameters: `hold` (seconds, overrides the step's elapse time),
/// `skip_lifetime` (seconds to wait after a cooperative skip) and
/// `allow_skip` (false vetoes skipping).
#[derive(Debug)]
pub struct TimedHelper {
    hold: Option<Duration>,
    skip_lifetime: Duration,
    allow_skip: bool,
    /// Time spent live while the flow was not paused
    pub active_for: Duration,
}

impl Default for TimedHelper {
    fn default() -> Self {
        Self {
            hold: None,
            skip_lifetime: Duration::ZERO,
            allow_skip: true,
            active_for: Duration::ZERO,
        }
    }
}

impl StepHelper for TimedHelper {
    fn name(&self) -> &'static str {
        "stepflow.helpers.Timed"
    }

    fn init(&mut self, ctx: &mut HelperContext<'_>) -> anyhow::Result<()> {
        self.hold = ctx.seconds("hold");
        self.skip_lifetime = ctx.seconds("skip_lifetime").unwrap_or(Duration::ZERO);
        self.allow_skip = ctx.flag("allow_skip").unwrap_or(true);
        Ok(())
    }

    fn on_update(&mut self, _ctx: &mut HelperContext<'_>, delta: Duration) {
        self.active_for += delta;
    }

    fn on_skip(&mut self, _ctx: &mut HelperContext<'_>) -> Duration {
        self.skip_lifetime
    }

    fn elapse_time(&self) -> Option<Duration> {
        self.hold
    }

    fn is_allow_skip(&self) -> bool {
        self.allow_skip
    }

    fn is_enable_update(&self) -> bool {
        true
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{StepContent, TriggerType};
    use crate::helper::{BoundParameter, BoundValue, StepHelperTask};
    use crate::host::StepEffects;

    #[derive(Default)]
    struct Highlights(Vec<TargetHandle>);

    impl StepEffects for Highlights {
        fn highlight(&mut self, target: TargetHandle) {
            self.0.push(target);
        }
    }

    fn param(name: &str, value: BoundValue) -> BoundParameter {
        BoundParameter {
            name: name.to_string(),
            value,
        }
    }

    #[test]
    fn test_highlight_helper_collects_auxiliary_targets() {
        let content = StepContent::new("s", TriggerType::PointerClick);
        let params = vec![
            param("a", BoundValue::Target(Some(TargetHandle(2)))),
            param("b", BoundValue::Target(None)),
            param("c", BoundValue::Target(Some(TargetHandle(1)))),
            param("d", BoundValue::Int(4)),
        ];
        let mut effects = Highlights::default();
        let mut ctx = HelperContext::new(
            0,
            StepHelperTask::Execute,
            &content,
            Some(TargetHandle(1)),
            &params,
            &mut effects,
        );

        let mut helper = HighlightHelper::default();
        helper.init(&mut ctx).unwrap();
        assert_eq!(helper.auxiliary_targets(), &[TargetHandle(2)]);

        helper.on_guide(&mut ctx);
        assert_eq!(effects.0, vec![TargetHandle(1), TargetHandle(2)]);
    }

    #[test]
    fn test_timed_helper_reads_parameters() {
        let content = StepContent::new("s", TriggerType::Auto);
        let params = vec![
            param("hold", BoundValue::Float(1.5)),
            param("skip_lifetime", BoundValue::Int(2)),
            param("allow_skip", BoundValue::Bool(false)),
        ];
        let mut effects = Highlights::default();
        let mut ctx = HelperContext::new(
            0,
            StepHelperTask::Execute,
            &content,
            None,
            &params,
            &mut effects,
        );

        let mut helper = TimedHelper::default();
        helper.init(&mut ctx).unwrap();

        assert_eq!(helper.elapse_time(), Some(Duration::from_millis(1500)));
        assert!(!helper.is_allow_skip());
        assert_eq!(helper.on_skip(&mut ctx), Duration::from_secs(2));
    }

    #[test]
    fn test_timed_helper_ignores_unrepresentable_holds() {
        let content = StepContent::new("s", TriggerType::Auto);
        for hold in [f64::INFINITY, 1e30] {
            let params = vec![
                param("hold", BoundValue::Float(hold)),
                param("skip_lifetime", BoundValue::Float(hold)),
            ];
            let mut effects = Highlights::default();
            let mut ctx = HelperContext::new(
                0,
                StepHelperTask::Execute,
                &content,
                None,
                &params,
                &mut effects,
            );

            let mut helper = TimedHelper::default();
            helper.init(&mut ctx).unwrap();

            assert_eq!(helper.elapse_time(), None);
            assert_eq!(helper.on_skip(&mut ctx), Duration::ZERO);
        }
    }
}
