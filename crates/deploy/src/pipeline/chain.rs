//! Recursive pipeline type.

use super::stages::NextStage;
use super::step::Step;

/// Terminal marker for the end of a pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct End;

/// A step followed by the rest of the pipeline.
///
/// The nesting encodes execution order, and `then` only accepts a step of the
/// stage that follows the last one.
#[derive(Debug, Clone, Copy)]
pub struct Pipeline<S, Next = End> {
    pub step: S,
    pub next: Next,
}

impl<S: Step> Pipeline<S, End> {
    pub fn new(step: S) -> Self {
        Self { step, next: End }
    }

    pub fn then<S2>(self, step: S2) -> Pipeline<S, Pipeline<S2, End>>
    where
        S2: Step,
        S::Stage: NextStage<Next = S2::Stage>,
    {
        Pipeline {
            step: self.step,
            next: Pipeline::new(step),
        }
    }
}

impl<S: Step, S2: Step> Pipeline<S, Pipeline<S2, End>> {
    pub fn then<S3>(self, step: S3) -> Pipeline<S, Pipeline<S2, Pipeline<S3, End>>>
    where
        S3: Step,
        S2::Stage: NextStage<Next = S3::Stage>,
    {
        Pipeline {
            step: self.step,
            next: Pipeline {
                step: self.next.step,
                next: Pipeline::new(step),
            },
        }
    }
}
