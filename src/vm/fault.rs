use thiserror::Error;

/// Conditions that halt a program abnormally. These are ordinary run
/// outcomes, reported to the caller as result codes 1 to 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Fault {
    #[error("illegal opcode")]
    InvalidOpcode,
    #[error("invalid jump target")]
    JumpBounds,
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("call stack overflow")]
    CallOverflow,
    #[error("call stack underflow")]
    CallUnderflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("argument out of range")]
    ArgumentRange,
}

impl Fault {
    pub const ALL: [Fault; 8] = [
        Fault::InvalidOpcode,
        Fault::JumpBounds,
        Fault::StackOverflow,
        Fault::StackUnderflow,
        Fault::CallOverflow,
        Fault::CallUnderflow,
        Fault::DivisionByZero,
        Fault::ArgumentRange,
    ];

    pub fn code(self) -> i32 {
        match self {
            Fault::InvalidOpcode => 1,
            Fault::JumpBounds => 2,
            Fault::StackOverflow => 3,
            Fault::StackUnderflow => 4,
            Fault::CallOverflow => 5,
            Fault::CallUnderflow => 6,
            Fault::DivisionByZero => 7,
            Fault::ArgumentRange => 8,
        }
    }

    pub fn from_code(code: i32) -> Option<Fault> {
        Self::ALL.into_iter().find(|f| f.code() == code)
    }

    /// What the user can try next, if there is anything.
    pub fn hint(self) -> Option<&'static str> {
        match self {
            Fault::InvalidOpcode => Some("Check if the correct password is set."),
            Fault::StackOverflow => Some("Try to increase the stack size with --stack-size."),
            Fault::CallOverflow => Some("Try to increase the call stack size with --call-size."),
            Fault::ArgumentRange => Some("Try to supply more command line arguments."),
            _ => None,
        }
    }
}
