//! Reserved keywords that drive the dialogue regardless of its current step.

/// A reserved input recognised before any free-text interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Start (or restart from scratch) a registration.
    Register,
    /// Abandon the registration in progress.
    Cancel,
    /// Go back and enter the name again.
    Restart,
    /// Ask for a human.
    CustomerService,
}

impl Trigger {
    /// Recognise a trigger. Surrounding whitespace and ASCII case are ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().to_lowercase();
        match text.as_str() {
            "註冊" | "register" => Some(Self::Register),
            "取消" | "cancel" => Some(Self::Cancel),
            "重新輸入" | "restart" => Some(Self::Restart),
            "客服" | "詢問客服" | "詢問" | "help" => Some(Self::CustomerService),
            _ => None,
        }
    }
}
