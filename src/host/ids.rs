use std::fmt;

/// Standard command set 2K.
pub const GUID_STD_COMMAND_SET_2K: &str = "{1496A755-94DE-11D0-8C3F-00C04FC2AAE2}";
/// Package manager console command set.
pub const GUID_NUGET_CONSOLE_CMD_SET: &str = "{1E8A55F6-C18D-407F-91C8-94B02AE1CED6}";
pub const CMDID_OUTPUT_PANE_COMBO: i32 = 1627;
/// Fired once the console has loaded its package sources; the console accepts input after it.
pub const CMDID_NUGET_SOURCES: i32 = 1024;

/// Identifies a host command: the command set GUID plus the numeric id within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandId {
    pub guid: String,
    pub id: i32,
}

impl CommandId {
    pub fn new(guid: impl Into<String>, id: i32) -> Self {
        Self {
            guid: guid.into(),
            id,
        }
    }

    pub fn nuget_sources() -> Self {
        Self::new(GUID_NUGET_CONSOLE_CMD_SET, CMDID_NUGET_SOURCES)
    }

    /// GUIDs arrive in whatever casing the host prefers, sometimes without braces.
    pub fn matches(&self, guid: &str, id: i32) -> bool {
        self.id == id && normalize_guid(&self.guid) == normalize_guid(guid)
    }

    pub fn is_console_ready(&self) -> bool {
        self.matches(GUID_NUGET_CONSOLE_CMD_SET, CMDID_NUGET_SOURCES)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.guid, self.id)
    }
}

fn normalize_guid(guid: &str) -> String {
    guid.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .to_ascii_uppercase()
}
