//! Pointer/keyboard simulation behind a trait so the dispatcher can be
//! exercised against a recording mock. Methods block (hardware events plus
//! inter-key delays) and are expected to run on a blocking task.

use std::time::Duration;

use enigo::{
    Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard as _, Mouse as _,
    Settings as EnigoSettings,
};

use crate::errors::{AgentError, AgentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "middle" => MouseButton::Middle,
            "right" => MouseButton::Right,
            // Unrecognized names fall back to the primary button.
            _ => MouseButton::Left,
        }
    }
}

pub trait InputDriver: Send + Sync {
    fn move_to(&self, x: i32, y: i32) -> AgentResult<()>;
    fn click_at(&self, x: i32, y: i32, button: MouseButton, clicks: u32) -> AgentResult<()>;
    fn write(&self, text: &str, interval: Duration) -> AgentResult<()>;
    fn press(&self, keys: &[String], presses: u32, interval: Duration) -> AgentResult<()>;
    fn hotkey(&self, keys: &[String]) -> AgentResult<()>;
    fn scroll(&self, amount: i32) -> AgentResult<()>;
}

/// enigo-backed driver. A fresh connection is opened per operation; the
/// platform handles inside `Enigo` are not `Send`, and operations are rare
/// enough that setup cost does not matter.
pub struct EnigoDriver;

impl EnigoDriver {
    fn session() -> AgentResult<Enigo> {
        Enigo::new(&EnigoSettings::default())
            .map_err(|e| AgentError::Executor(format!("input connection failed: {e}")))
    }

    fn exec_err(e: impl std::fmt::Display) -> AgentError {
        AgentError::Executor(e.to_string())
    }
}

impl InputDriver for EnigoDriver {
    fn move_to(&self, x: i32, y: i32) -> AgentResult<()> {
        let mut enigo = Self::session()?;
        enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(Self::exec_err)
    }

    fn click_at(&self, x: i32, y: i32, button: MouseButton, clicks: u32) -> AgentResult<()> {
        let mut enigo = Self::session()?;
        enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(Self::exec_err)?;
        let button = match button {
            MouseButton::Left => Button::Left,
            MouseButton::Middle => Button::Middle,
            MouseButton::Right => Button::Right,
        };
        for _ in 0..clicks.max(1) {
            enigo.button(button, Direction::Click).map_err(Self::exec_err)?;
        }
        Ok(())
    }

    fn write(&self, text: &str, interval: Duration) -> AgentResult<()> {
        let mut enigo = Self::session()?;
        if interval.is_zero() {
            return enigo.text(text).map_err(Self::exec_err);
        }
        for c in text.chars() {
            enigo
                .key(Key::Unicode(c), Direction::Click)
                .map_err(Self::exec_err)?;
            std::thread::sleep(interval);
        }
        Ok(())
    }

    fn press(&self, keys: &[String], presses: u32, interval: Duration) -> AgentResult<()> {
        let mut enigo = Self::session()?;
        for rep in 0..presses.max(1) {
            if rep > 0 {
                std::thread::sleep(interval);
            }
            for name in keys {
                let key = key_from_name(name)?;
                enigo.key(key, Direction::Click).map_err(Self::exec_err)?;
            }
        }
        Ok(())
    }

    fn hotkey(&self, keys: &[String]) -> AgentResult<()> {
        let mut enigo = Self::session()?;
        let parsed: Vec<Key> = keys
            .iter()
            .map(|name| key_from_name(name))
            .collect::<AgentResult<_>>()?;
        for key in &parsed {
            enigo.key(*key, Direction::Press).map_err(Self::exec_err)?;
        }
        for key in parsed.iter().rev() {
            enigo.key(*key, Direction::Release).map_err(Self::exec_err)?;
        }
        Ok(())
    }

    fn scroll(&self, amount: i32) -> AgentResult<()> {
        let mut enigo = Self::session()?;
        // Positive amounts scroll up; enigo's vertical axis is inverted.
        enigo.scroll(-amount, Axis::Vertical).map_err(Self::exec_err)
    }
}

/// Maps the key names the model emits (pyautogui-style) onto enigo keys.
pub fn key_from_name(name: &str) -> AgentResult<Key> {
    let lower = name.trim().to_ascii_lowercase();
    let key = match lower.as_str() {
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "space" => Key::Space,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "ctrl" | "control" => Key::Control,
        "alt" | "option" => Key::Alt,
        "shift" => Key::Shift,
        "cmd" | "command" | "win" | "super" | "meta" => Key::Meta,
        "capslock" => Key::CapsLock,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        _ => {
            let mut chars = lower.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Unicode(c),
                _ => {
                    return Err(AgentError::Executor(format!("unknown key name: {name}")));
                }
            }
        }
    };
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_resolve() {
        assert!(matches!(key_from_name("Enter"), Ok(Key::Return)));
        assert!(matches!(key_from_name("ctrl"), Ok(Key::Control)));
        assert!(matches!(key_from_name("F5"), Ok(Key::F5)));
        assert!(matches!(key_from_name("a"), Ok(Key::Unicode('a'))));
    }

    #[test]
    fn multi_char_unknown_key_is_an_error() {
        assert!(key_from_name("notakey").is_err());
    }

    #[test]
    fn button_names_default_to_left() {
        assert_eq!(MouseButton::from_name("right"), MouseButton::Right);
        assert_eq!(MouseButton::from_name("middle"), MouseButton::Middle);
        assert_eq!(MouseButton::from_name("left"), MouseButton::Left);
        assert_eq!(MouseButton::from_name("banana"), MouseButton::Left);
    }
}
