//! Role vocabulary and attribute alias tables.
//!
//! Platform trees report roles as strings (`AXButton`, `button`, `MenuItem`).
//! Known roles are folded onto [`Role`]; anything else keeps its lowercased
//! raw name so the vocabulary stays open for indexing while matching logic
//! only ever branches on the closed set.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Button,
    Link,
    MenuItem,
    CheckBox,
    RadioButton,
    Tab,
    ToolbarButton,
    PopUpButton,
    ComboBox,
    MenuButton,
    MenuBarItem,
    DisclosureTriangle,
    Cell,
    Row,
    StaticText,
    TextField,
    TextArea,
    SearchField,
    Slider,
    Image,
    Group,
    Toolbar,
    Menu,
    MenuBar,
    List,
    Table,
    ScrollArea,
    TabGroup,
    Window,
    Sheet,
    Application,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RoleCategory {
    Clickable,
    Input,
    Text,
    Container,
    Other,
}

const ALL_ROLES: &[Role] = &[
    Role::Button,
    Role::Link,
    Role::MenuItem,
    Role::CheckBox,
    Role::RadioButton,
    Role::Tab,
    Role::ToolbarButton,
    Role::PopUpButton,
    Role::ComboBox,
    Role::MenuButton,
    Role::MenuBarItem,
    Role::DisclosureTriangle,
    Role::Cell,
    Role::Row,
    Role::StaticText,
    Role::TextField,
    Role::TextArea,
    Role::SearchField,
    Role::Slider,
    Role::Image,
    Role::Group,
    Role::Toolbar,
    Role::Menu,
    Role::MenuBar,
    Role::List,
    Role::Table,
    Role::ScrollArea,
    Role::TabGroup,
    Role::Window,
    Role::Sheet,
    Role::Application,
];

/// Requested-role spellings that mean "anything activatable".
const GENERIC_CLICKABLE: &[&str] = &["", "clickable", "any", "element", "control"];

impl Role {
    pub fn all() -> &'static [Role] {
        ALL_ROLES
    }

    /// Canonical key used in the element index and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Button => "button",
            Role::Link => "link",
            Role::MenuItem => "menuItem",
            Role::CheckBox => "checkbox",
            Role::RadioButton => "radioButton",
            Role::Tab => "tab",
            Role::ToolbarButton => "toolbarButton",
            Role::PopUpButton => "popUpButton",
            Role::ComboBox => "comboBox",
            Role::MenuButton => "menuButton",
            Role::MenuBarItem => "menuBarItem",
            Role::DisclosureTriangle => "disclosureTriangle",
            Role::Cell => "cell",
            Role::Row => "row",
            Role::StaticText => "staticText",
            Role::TextField => "textField",
            Role::TextArea => "textArea",
            Role::SearchField => "searchField",
            Role::Slider => "slider",
            Role::Image => "image",
            Role::Group => "group",
            Role::Toolbar => "toolbar",
            Role::Menu => "menu",
            Role::MenuBar => "menuBar",
            Role::List => "list",
            Role::Table => "table",
            Role::ScrollArea => "scrollArea",
            Role::TabGroup => "tabGroup",
            Role::Window => "window",
            Role::Sheet => "sheet",
            Role::Application => "application",
        }
    }

    pub fn category(&self) -> RoleCategory {
        match self {
            Role::Button
            | Role::Link
            | Role::MenuItem
            | Role::CheckBox
            | Role::RadioButton
            | Role::Tab
            | Role::ToolbarButton
            | Role::PopUpButton
            | Role::ComboBox
            | Role::MenuButton
            | Role::MenuBarItem
            | Role::DisclosureTriangle
            | Role::Cell
            | Role::Row => RoleCategory::Clickable,
            Role::TextField | Role::TextArea | Role::SearchField | Role::Slider => {
                RoleCategory::Input
            }
            Role::StaticText | Role::Image => RoleCategory::Text,
            Role::Group
            | Role::Toolbar
            | Role::Menu
            | Role::MenuBar
            | Role::List
            | Role::Table
            | Role::ScrollArea
            | Role::TabGroup
            | Role::Window
            | Role::Sheet
            | Role::Application => RoleCategory::Container,
        }
    }

    /// Parses platform spellings: `AXButton`, `button`, `Button`, `check box`.
    pub fn parse(raw: &str) -> Option<Role> {
        let folded = fold_role_name(raw);
        if folded.is_empty() {
            return None;
        }
        let role = match folded.as_str() {
            "button" | "pushbutton" => Role::Button,
            "link" | "hyperlink" => Role::Link,
            "menuitem" => Role::MenuItem,
            "checkbox" => Role::CheckBox,
            "radiobutton" | "radio" => Role::RadioButton,
            "tab" | "tabitem" => Role::Tab,
            "toolbarbutton" => Role::ToolbarButton,
            "popupbutton" => Role::PopUpButton,
            "combobox" => Role::ComboBox,
            "menubutton" => Role::MenuButton,
            "menubaritem" => Role::MenuBarItem,
            "disclosuretriangle" => Role::DisclosureTriangle,
            "cell" => Role::Cell,
            "row" => Role::Row,
            "statictext" | "text" | "label" => Role::StaticText,
            "textfield" | "edit" => Role::TextField,
            "textarea" => Role::TextArea,
            "searchfield" => Role::SearchField,
            "slider" => Role::Slider,
            "image" => Role::Image,
            "group" | "pane" => Role::Group,
            "toolbar" => Role::Toolbar,
            "menu" => Role::Menu,
            "menubar" => Role::MenuBar,
            "list" | "outline" => Role::List,
            "table" => Role::Table,
            "scrollarea" => Role::ScrollArea,
            "tabgroup" => Role::TabGroup,
            "window" => Role::Window,
            "sheet" | "dialog" => Role::Sheet,
            "application" => Role::Application,
            _ => return None,
        };
        Some(role)
    }
}

fn fold_role_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_prefix = trimmed.strip_prefix("AX").unwrap_or(trimmed);
    without_prefix
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Index key for a raw role string. Known roles map to their canonical
/// name, unknown ones keep a folded spelling so they are still indexable.
pub fn normalize_role(raw: &str) -> String {
    match Role::parse(raw) {
        Some(role) => role.as_str().to_string(),
        None => fold_role_name(raw),
    }
}

pub fn category_of(role_key: &str) -> RoleCategory {
    Role::parse(role_key)
        .map(|role| role.category())
        .unwrap_or(RoleCategory::Other)
}

/// True for empty or catch-all role requests ("", "clickable").
pub fn is_generic_request(role: &str) -> bool {
    let folded = fold_role_name(role);
    GENERIC_CLICKABLE.contains(&folded.as_str())
}

/// The platform's primary activatable role, used by the role-restricted
/// fallback stage.
pub fn primary_button_role() -> &'static str {
    Role::Button.as_str()
}

pub fn default_clickable_roles() -> Vec<String> {
    [
        Role::Button,
        Role::Link,
        Role::MenuItem,
        Role::CheckBox,
        Role::RadioButton,
        Role::Tab,
        Role::ToolbarButton,
        Role::PopUpButton,
        Role::ComboBox,
        Role::MenuButton,
        Role::MenuBarItem,
    ]
    .iter()
    .map(|role| role.as_str().to_string())
    .collect()
}

/// Platform spellings tried, in order, when reading a logical attribute.
pub fn attribute_aliases(logical: &str) -> &'static [&'static str] {
    match logical {
        "title" => &["AXTitle", "title", "name", "AXLabel"],
        "description" => &["AXDescription", "description", "AXHelp"],
        "value" => &["AXValue", "value"],
        "help" => &["AXHelp", "help", "AXToolTip"],
        "identifier" => &["AXIdentifier", "identifier", "automationId"],
        "placeholder" => &["AXPlaceholderValue", "placeholder"],
        "role" => &["AXRole", "role"],
        "subrole" => &["AXSubrole", "subrole"],
        "enabled" => &["AXEnabled", "enabled"],
        _ => &[],
    }
}

/// Text attributes captured for every element during traversal.
pub const TEXT_ATTRIBUTES: &[&str] = &["description", "value", "help", "identifier", "placeholder"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_platform_spellings() {
        assert_eq!(Role::parse("AXButton"), Some(Role::Button));
        assert_eq!(Role::parse("button"), Some(Role::Button));
        assert_eq!(Role::parse("AXMenuItem"), Some(Role::MenuItem));
        assert_eq!(Role::parse("check box"), Some(Role::CheckBox));
        assert_eq!(Role::parse("AXPopUpButton"), Some(Role::PopUpButton));
        assert_eq!(Role::parse("AXWebArea"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn canonical_names_round_trip() {
        for role in Role::all() {
            assert_eq!(Role::parse(role.as_str()), Some(*role));
        }
    }

    #[test]
    fn unknown_roles_stay_indexable() {
        assert_eq!(normalize_role("AXWebArea"), "webarea");
        assert_eq!(normalize_role("AXButton"), "button");
        assert_eq!(category_of("webarea"), RoleCategory::Other);
    }

    #[test]
    fn default_clickable_roles_are_clickable() {
        for key in default_clickable_roles() {
            assert_eq!(category_of(&key), RoleCategory::Clickable);
        }
        assert_eq!(default_clickable_roles().len(), 11);
    }

    #[test]
    fn generic_requests() {
        assert!(is_generic_request(""));
        assert!(is_generic_request("Clickable"));
        assert!(!is_generic_request("button"));
    }
}
