use std::fmt;

// ---------------------------------------------------------------------------
// ReasonCode
// ---------------------------------------------------------------------------

/// Protocol status / error code carried by stop requests, state changes and
/// conversation-closed notifications.
///
/// Codes with the high bit set are failures; everything else is success or
/// an informational status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReasonCode(pub u32);

// ---

impl ReasonCode {
    // --- general
    pub const SUCCESS: Self = Self(0x0000_0000);
    pub const FAILURE: Self = Self(0x8000_0000);
    pub const REQUEST_DELAY: Self = Self(0x0000_0001);
    pub const REQUEST_INVALID: Self = Self(0x8000_0001);
    pub const NO_USER: Self = Self(0x8000_0006);

    // --- connection / disconnection
    pub const CONNECTION_BROKEN: Self = Self(0x8000_0210);
    pub const CONNECTION_ABORTED: Self = Self(0x8000_0211);
    pub const CONNECTION_REFUSED: Self = Self(0x8000_0212);
    pub const CONNECTION_RESET: Self = Self(0x8000_0213);
    pub const CONNECTION_TIMED: Self = Self(0x8000_0214);
    pub const CONNECTION_CLOSED: Self = Self(0x8000_0215);
    pub const INCORRECT_LOGIN: Self = Self(0x8000_0219);
    pub const VERIFICATION_DOWN: Self = Self(0x8000_021A);

    // --- client
    pub const CLIENT_USER_GONE: Self = Self(0x8000_2000);
    pub const CLIENT_USER_DND: Self = Self(0x8000_2001);
    pub const CLIENT_USER_ELSEWHERE: Self = Self(0x8000_2002);

    // --- instant messaging
    pub const IM_COULDNT_REGISTER: Self = Self(0x8000_0500);
    pub const IM_ALREADY_REGISTERED: Self = Self(0x8000_0501);
    pub const IM_NOT_REGISTERED: Self = Self(0x8000_0503);

    // ---

    /// `true` when the high (failure) bit is set.
    pub fn is_error(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Human-readable description, `None` for codes without one.
    pub fn description(self) -> Option<&'static str> {
        // ---
        let text = match self {
            Self::SUCCESS => "Success",
            Self::FAILURE => "General failure",
            Self::REQUEST_DELAY => "Request delayed",
            Self::REQUEST_INVALID => "Request is invalid",
            Self::NO_USER => "User is not online",
            Self::CLIENT_USER_GONE => "User not present",
            Self::CLIENT_USER_DND => "User is in Do Not Disturb mode",
            Self::CLIENT_USER_ELSEWHERE => "Already logged in elsewhere",
            Self::CONNECTION_BROKEN => "Connection broken",
            Self::CONNECTION_ABORTED => "Connection aborted",
            Self::CONNECTION_REFUSED => "Connection refused",
            Self::CONNECTION_RESET => "Connection reset",
            Self::CONNECTION_TIMED => "Connection timed out",
            Self::CONNECTION_CLOSED => "Connection closed",
            Self::INCORRECT_LOGIN => "Incorrect Username/Password",
            Self::VERIFICATION_DOWN => "Login verification down or unavailable",
            Self::IM_COULDNT_REGISTER => "IM service could not register",
            Self::IM_ALREADY_REGISTERED => "IM service already registered",
            Self::IM_NOT_REGISTERED => "IM service not registered",
            _ => return None,
        };
        Some(text)
    }
}

// ---

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(text) => f.write_str(text),
            None => write!(f, "0x{:08x}", self.0),
        }
    }
}

// ---

impl From<u32> for ReasonCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

// ---------------------------------------------------------------------------
// ServiceType
// ---------------------------------------------------------------------------

/// Identifier a feature module registers under in the service registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceType(pub u32);

// ---

impl ServiceType {
    // ---
    pub const AWARE: Self = Self(0x0000_0011);
    pub const RESOLVE: Self = Self(0x0000_0015);
    pub const STORAGE: Self = Self(0x0000_0018);
    pub const DIRECTORY: Self = Self(0x0000_001A);
    pub const IM: Self = Self(0x0000_1000);
    pub const CONFERENCE: Self = Self(0x8000_0010);
    pub const PLACE: Self = Self(0x8000_0022);
}

// ---

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
