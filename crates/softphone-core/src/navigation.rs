//! Navigation routing
//!
//! [`route`] maps the presented screens, a [`NavigationEvent`] and the
//! [`LayoutMode`] to at most one [`NavigationIntent`]. It is a pure function:
//! the engine context keeps the [`PresentedScreens`] mirror and only the
//! resulting intents cross to the presentation side.
//!
//! Two layouts are supported:
//!
//! - **Compact**: one slot. Every target lands in the primary slot and back
//!   pops one level towards the root screen.
//! - **Expanded**: a list slot and a detail slot side by side. A detail screen
//!   lands in the secondary slot when the primary screen is compatible with it,
//!   otherwise it replaces the primary and the secondary pane shows a
//!   placeholder or is hidden. Back is absorbed.
//!
//! # Examples
//!
//! ```rust
//! use rvoip_softphone_core::navigation::{route, LayoutMode, LayoutSlot, NavigationEvent, PresentedScreens, Screen};
//!
//! let mut presented = PresentedScreens::default();
//! presented.primary = Screen::ChatList;
//!
//! let intent = route(&presented, &NavigationEvent::MenuSelected(Screen::Chat), LayoutMode::Expanded).unwrap();
//! assert_eq!(intent.target_screen, Screen::Chat);
//! assert_eq!(intent.layout_slot, LayoutSlot::Secondary);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::session::CallId;

/// Layout of the presentation surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    /// Single slot (phone)
    #[default]
    Compact,
    /// Primary and secondary slot side by side (tablet)
    Expanded,
}

/// Screens the presentation side can render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Screen {
    Dialer,
    ContactsList,
    HistoryList,
    ChatList,
    ContactDetail,
    ContactEditor,
    HistoryDetail,
    Chat,
    GroupChat,
    ChatCreation,
    GroupInfo,
    MessageImdn,
    Settings,
    AccountSettings,
    About,
    IncomingCall,
    OutgoingCall,
    InCall,
}

impl Screen {
    /// Screen shown at startup and after the last call ends
    pub const DEFAULT: Screen = Screen::Dialer;

    /// Parent screen for back navigation; `None` for roots and call screens
    pub fn parent(self) -> Option<Screen> {
        use Screen::*;
        match self {
            ContactDetail => Some(ContactsList),
            ContactEditor => Some(ContactDetail),
            HistoryDetail => Some(HistoryList),
            Chat | GroupChat | ChatCreation => Some(ChatList),
            GroupInfo | MessageImdn => Some(GroupChat),
            Settings | About => Some(Dialer),
            AccountSettings => Some(Settings),
            Dialer | ContactsList | HistoryList | ChatList => None,
            IncomingCall | OutgoingCall | InCall => None,
        }
    }

    pub fn is_root(self) -> bool {
        matches!(self, Screen::Dialer | Screen::ContactsList | Screen::HistoryList | Screen::ChatList)
    }

    pub fn is_call_screen(self) -> bool {
        matches!(self, Screen::IncomingCall | Screen::OutgoingCall | Screen::InCall)
    }

    /// Screens whose data may have changed even when already presented
    pub fn always_rerender(self) -> bool {
        matches!(self, Screen::Chat | Screen::GroupChat | Screen::IncomingCall)
    }

    /// Primary screens next to which this screen may sit in the secondary slot
    pub fn compatible_primaries(self) -> &'static [Screen] {
        use Screen::*;
        match self {
            HistoryDetail => &[HistoryList],
            ContactDetail => &[ContactsList],
            ContactEditor => &[ContactsList, ContactDetail],
            Chat | GroupChat | MessageImdn => &[ChatList],
            _ => &[],
        }
    }

    /// In expanded layout, whether this primary target hides the secondary pane
    pub fn hides_secondary_pane(self) -> bool {
        use Screen::*;
        matches!(
            self,
            Dialer | About | Settings | AccountSettings | ChatCreation | GroupInfo
        ) || self.is_call_screen()
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Slot a screen is presented in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutSlot {
    Primary,
    Secondary,
}

/// What the secondary pane shows when the primary slot changes in expanded layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecondaryPane {
    /// Neutral empty placeholder
    Placeholder,
    /// Pane collapsed
    Hidden,
}

/// Screens currently presented, as mirrored on the engine context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentedScreens {
    pub primary: Screen,
    pub secondary: Option<Screen>,
}

impl Default for PresentedScreens {
    fn default() -> Self {
        Self {
            primary: Screen::DEFAULT,
            secondary: None,
        }
    }
}

impl PresentedScreens {
    /// Screen currently shown in `slot`
    pub fn in_slot(&self, slot: LayoutSlot) -> Option<Screen> {
        match slot {
            LayoutSlot::Primary => Some(self.primary),
            LayoutSlot::Secondary => self.secondary,
        }
    }

    /// Update the mirror after an intent was emitted
    pub fn apply(&mut self, intent: &NavigationIntent) {
        match intent.layout_slot {
            LayoutSlot::Primary => {
                self.primary = intent.target_screen;
                self.secondary = None;
            }
            LayoutSlot::Secondary => self.secondary = Some(intent.target_screen),
        }
    }
}

/// Request to present a screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationIntent {
    pub target_screen: Screen,
    pub layout_slot: LayoutSlot,
    /// Set only in expanded layout when the primary slot changes
    pub secondary_pane: Option<SecondaryPane>,
    /// Identity used by the presentation side to collapse duplicates
    pub dedupe_key: String,
}

impl NavigationIntent {
    fn new(target_screen: Screen, layout_slot: LayoutSlot, secondary_pane: Option<SecondaryPane>) -> Self {
        let slot = match layout_slot {
            LayoutSlot::Primary => "primary",
            LayoutSlot::Secondary => "secondary",
        };
        Self {
            target_screen,
            layout_slot,
            secondary_pane,
            dedupe_key: format!("{target_screen}@{slot}"),
        }
    }
}

/// Input to the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationEvent {
    SessionIncoming { call_id: CallId },
    SessionOutgoing { call_id: CallId },
    SessionConnected { call_id: CallId },
    AllSessionsEnded,
    MenuSelected(Screen),
    Back,
}

/// Compute the intent for `event`, or `None` when nothing should change
pub fn route(presented: &PresentedScreens, event: &NavigationEvent, layout: LayoutMode) -> Option<NavigationIntent> {
    let target = match event {
        NavigationEvent::SessionIncoming { .. } => Screen::IncomingCall,
        NavigationEvent::SessionOutgoing { .. } => Screen::OutgoingCall,
        NavigationEvent::SessionConnected { .. } => Screen::InCall,
        NavigationEvent::AllSessionsEnded => Screen::DEFAULT,
        NavigationEvent::MenuSelected(screen) => *screen,
        NavigationEvent::Back => return back(presented, layout),
    };

    let intent = match layout {
        LayoutMode::Compact => NavigationIntent::new(target, LayoutSlot::Primary, None),
        LayoutMode::Expanded => expanded_intent(presented, target),
    };

    let already_presented = presented.in_slot(intent.layout_slot) == Some(target);
    if already_presented && !target.always_rerender() {
        return None;
    }
    Some(intent)
}

fn expanded_intent(presented: &PresentedScreens, target: Screen) -> NavigationIntent {
    if target.is_call_screen() {
        return NavigationIntent::new(target, LayoutSlot::Primary, Some(SecondaryPane::Hidden));
    }
    if target.compatible_primaries().contains(&presented.primary) {
        return NavigationIntent::new(target, LayoutSlot::Secondary, None);
    }
    let pane = if target.hides_secondary_pane() {
        SecondaryPane::Hidden
    } else {
        SecondaryPane::Placeholder
    };
    NavigationIntent::new(target, LayoutSlot::Primary, Some(pane))
}

fn back(presented: &PresentedScreens, layout: LayoutMode) -> Option<NavigationIntent> {
    match layout {
        LayoutMode::Expanded => None,
        LayoutMode::Compact => presented
            .primary
            .parent()
            .map(|parent| NavigationIntent::new(parent, LayoutSlot::Primary, None)),
    }
}
