use std::fmt;

/// Command codes carried in the frame header `cmd` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandCode {
    SessKeyNegStart = 3,
    SessKeyNegResp = 4,
    SessKeyNegFinish = 5,
    ControlNew = 13,
    DpQueryNew = 16,
}

impl CommandCode {
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            3 => Some(CommandCode::SessKeyNegStart),
            4 => Some(CommandCode::SessKeyNegResp),
            5 => Some(CommandCode::SessKeyNegFinish),
            13 => Some(CommandCode::ControlNew),
            16 => Some(CommandCode::DpQueryNew),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandCode::SessKeyNegStart => "SESS_KEY_NEG_START",
            CommandCode::SessKeyNegResp => "SESS_KEY_NEG_RESP",
            CommandCode::SessKeyNegFinish => "SESS_KEY_NEG_FINISH",
            CommandCode::ControlNew => "CONTROL_NEW",
            CommandCode::DpQueryNew => "DP_QUERY_NEW",
        }
    }
}

impl From<CommandCode> for u32 {
    fn from(cmd: CommandCode) -> Self {
        cmd.code()
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}
