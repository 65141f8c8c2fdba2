pub mod fsm;
pub mod relay;
pub mod verify;

pub use self::{
    fsm::FiniteStateMachine,
    relay::{MessageRelay, Outgoing},
    verify::SenderVerifier,
};
