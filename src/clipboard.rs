use crate::controller::ClipboardSource;
use crate::error::ClipboardError;

pub struct SystemClipboard;

impl ClipboardSource for SystemClipboard {
    fn read_text(&self) -> Result<String, ClipboardError> {
        read_string()
    }
}

pub fn read_string() -> Result<String, ClipboardError> {
    #[cfg(windows)]
    {
        clipboard_win::get_clipboard_string()
            .map_err(|e| ClipboardError::Unavailable(e.to_string()))
    }
    #[cfg(not(windows))]
    {
        Err(ClipboardError::Unavailable("no clipboard backend on this platform".into()))
    }
}

pub fn write_string(s: &str) -> Result<(), ClipboardError> {
    #[cfg(windows)]
    {
        clipboard_win::set_clipboard_string(s)
            .map_err(|e| ClipboardError::Unavailable(e.to_string()))
    }
    #[cfg(not(windows))]
    {
        let _ = s;
        Err(ClipboardError::Unavailable("no clipboard backend on this platform".into()))
    }
}
