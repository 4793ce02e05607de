//! Chat color codes and the server-configured semantic color table.
//!
//! The wire carries two-character codes of the form `&<hex digit>`. On top
//! of those, messages may use single-letter semantic aliases (`&S` for the
//! system color and so on) that resolve to concrete hex codes at wrap
//! time, so a config reload recolors everything produced afterwards.

use std::sync::{Arc, PoisonError, RwLock};

/// The escape character introducing a two-character color code.
pub const COLOR_ESCAPE: char = '&';

/// Server-configured colors for each semantic message class.
///
/// Alias letters deliberately avoid the `0-9a-f` range so they can never
/// be mistaken for a literal color: `S`ystem, sa`Y`, `P`rivate,
/// announcement (`R`), `H`elp, `W`arning, `M`e, `I`RC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorCodes {
    pub system: char,
    pub say: char,
    pub private: char,
    pub announcement: char,
    pub help: char,
    pub warning: char,
    pub me: char,
    pub irc: char,
}

impl Default for ColorCodes {
    fn default() -> Self {
        Self {
            system: 'e',
            say: 'a',
            private: '7',
            announcement: 'd',
            help: 'b',
            warning: 'c',
            me: '6',
            irc: '5',
        }
    }
}

impl ColorCodes {
    /// Resolve one code letter to a concrete hex color character.
    /// Literal hex digits pass through; alias letters look up the
    /// configured color; anything else is not a color code.
    pub fn resolve(&self, code: char) -> Option<char> {
        let code = code.to_ascii_lowercase();
        match code {
            '0'..='9' | 'a'..='f' => Some(code),
            's' => Some(self.system),
            'y' => Some(self.say),
            'p' => Some(self.private),
            'r' => Some(self.announcement),
            'h' => Some(self.help),
            'w' => Some(self.warning),
            'm' => Some(self.me),
            'i' => Some(self.irc),
            _ => None,
        }
    }
}

/// Process-wide color table, read by every session on every wrapped
/// message and swapped wholesale on configuration reload. Readers always
/// see a complete snapshot, never a half-updated table.
#[derive(Debug, Default)]
pub struct SharedColors {
    inner: RwLock<Arc<ColorCodes>>,
}

impl SharedColors {
    pub fn new(codes: ColorCodes) -> Self {
        Self {
            inner: RwLock::new(Arc::new(codes)),
        }
    }

    /// Current snapshot. Cheap: clones an `Arc`, not the table.
    pub fn load(&self) -> Arc<ColorCodes> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the table atomically. In-flight readers keep the snapshot
    /// they already loaded.
    pub fn store(&self, codes: ColorCodes) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(codes);
    }
}
