//! Session lifecycle states

/// Where the session is in its listen → respond cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Waiting for a wake trigger
    #[default]
    Idle,
    /// Recording the user's utterance
    Listening,
    /// Converting the utterance to text
    Transcribing,
    /// Resolving intent
    Thinking,
    /// Running a predefined action
    Acting,
    /// Generating a conversational reply
    Chatting,
    /// Playing the response
    Speaking,
}

impl SessionState {
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Whether moving from `self` to `to` is part of the lifecycle
    ///
    /// Every non-idle state may return to idle (stop, shutdown, failure).
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            (Self::Idle, Self::Listening) => true,
            (Self::Idle, _) => false,
            (_, Self::Idle) => true,
            (Self::Listening, Self::Transcribing)
            | (Self::Transcribing, Self::Thinking)
            | (
                Self::Transcribing | Self::Thinking,
                Self::Acting | Self::Chatting | Self::Speaking,
            )
            | (Self::Acting | Self::Chatting, Self::Speaking) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Listening => "LISTENING",
            Self::Transcribing => "TRANSCRIBING",
            Self::Thinking => "THINKING",
            Self::Acting => "ACTING",
            Self::Chatting => "CHATTING",
            Self::Speaking => "SPEAKING",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;
    use super::*;

    const ALL: [SessionState; 7] = [
        Idle,
        Listening,
        Transcribing,
        Thinking,
        Acting,
        Chatting,
        Speaking,
    ];

    #[test]
    fn test_lifecycle_path() {
        assert!(Idle.can_transition_to(Listening));
        assert!(Listening.can_transition_to(Transcribing));
        assert!(Transcribing.can_transition_to(Thinking));
        assert!(Thinking.can_transition_to(Acting));
        assert!(Thinking.can_transition_to(Chatting));
        assert!(Acting.can_transition_to(Speaking));
        assert!(Chatting.can_transition_to(Speaking));
        assert!(Speaking.can_transition_to(Idle));
    }

    #[test]
    fn test_every_state_reaches_idle() {
        for state in ALL.into_iter().filter(|s| !s.is_idle()) {
            assert!(state.can_transition_to(Idle), "{state}");
        }
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Idle.can_transition_to(Speaking));
        assert!(!Idle.can_transition_to(Idle));
        assert!(!Listening.can_transition_to(Thinking));
        assert!(!Speaking.can_transition_to(Listening));
        assert!(!Acting.can_transition_to(Chatting));
        assert!(!Chatting.can_transition_to(Thinking));
    }

    #[test]
    fn test_display() {
        assert_eq!(Transcribing.to_string(), "TRANSCRIBING");
        assert_eq!(SessionState::default(), Idle);
    }
}
