/// A state machine whose transitions also describe the work the caller
/// has to carry out before feeding the next input.
pub trait FiniteStateMachine: Sized {
    type Input;
    type Context;
    type Effect;

    #[must_use]
    fn transition(self, input: Self::Input, context: &mut Self::Context) -> (Self, Self::Effect);
}
