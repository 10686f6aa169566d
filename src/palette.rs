use std::fmt;
use std::str::FromStr;

use image::Rgb;

/// The fixed set of colors a class can be drawn with.
///
/// The declaration order is also the default cycle used for classes that
/// do not name a color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedColor {
    Red,
    Blue,
    Green,
    Yellow,
    Purple,
    Orange,
    Cyan,
    Magenta,
    Lime,
    Pink,
    Brown,
    Gray,
    Navy,
    Olive,
    Teal,
    Maroon,
    Fuchsia,
    Aqua,
}

impl NamedColor {
    pub const ALL: [NamedColor; 18] = [
        NamedColor::Red,
        NamedColor::Blue,
        NamedColor::Green,
        NamedColor::Yellow,
        NamedColor::Purple,
        NamedColor::Orange,
        NamedColor::Cyan,
        NamedColor::Magenta,
        NamedColor::Lime,
        NamedColor::Pink,
        NamedColor::Brown,
        NamedColor::Gray,
        NamedColor::Navy,
        NamedColor::Olive,
        NamedColor::Teal,
        NamedColor::Maroon,
        NamedColor::Fuchsia,
        NamedColor::Aqua,
    ];

    pub fn token(self) -> &'static str {
        match self {
            NamedColor::Red => "red",
            NamedColor::Blue => "blue",
            NamedColor::Green => "green",
            NamedColor::Yellow => "yellow",
            NamedColor::Purple => "purple",
            NamedColor::Orange => "orange",
            NamedColor::Cyan => "cyan",
            NamedColor::Magenta => "magenta",
            NamedColor::Lime => "lime",
            NamedColor::Pink => "pink",
            NamedColor::Brown => "brown",
            NamedColor::Gray => "gray",
            NamedColor::Navy => "navy",
            NamedColor::Olive => "olive",
            NamedColor::Teal => "teal",
            NamedColor::Maroon => "maroon",
            NamedColor::Fuchsia => "fuchsia",
            NamedColor::Aqua => "aqua",
        }
    }

    /// CSS color values.
    pub fn rgb(self) -> Rgb<u8> {
        let [r, g, b] = match self {
            NamedColor::Red => [255, 0, 0],
            NamedColor::Blue => [0, 0, 255],
            NamedColor::Green => [0, 128, 0],
            NamedColor::Yellow => [255, 255, 0],
            NamedColor::Purple => [128, 0, 128],
            NamedColor::Orange => [255, 165, 0],
            NamedColor::Cyan => [0, 255, 255],
            NamedColor::Magenta => [255, 0, 255],
            NamedColor::Lime => [0, 255, 0],
            NamedColor::Pink => [255, 192, 203],
            NamedColor::Brown => [165, 42, 42],
            NamedColor::Gray => [128, 128, 128],
            NamedColor::Navy => [0, 0, 128],
            NamedColor::Olive => [128, 128, 0],
            NamedColor::Teal => [0, 128, 128],
            NamedColor::Maroon => [128, 0, 0],
            NamedColor::Fuchsia => [255, 0, 255],
            NamedColor::Aqua => [0, 255, 255],
        };
        Rgb([r, g, b])
    }

    pub fn token_list() -> String {
        Self::ALL
            .iter()
            .map(|c| c.token())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for NamedColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown color {0:?}")]
pub struct UnknownColor(pub String);

impl FromStr for NamedColor {
    type Err = UnknownColor;

    /// Case-insensitive; surrounding whitespace is not accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.token().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownColor(s.to_string()))
    }
}

/// Color used for detections whose class id has no palette entry.
pub const FALLBACK_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Color of the `index`-th class that did not name its own color.
pub fn default_color(index: usize) -> NamedColor {
    NamedColor::ALL[index % NamedColor::ALL.len()]
}

/// One validated class line before colors are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSpec {
    pub name: String,
    pub color: Option<NamedColor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassColorEntry {
    pub name: String,
    pub color: NamedColor,
    /// Whether the color came from the class file rather than the default cycle.
    pub explicit: bool,
}

/// Ordered class-name-to-color assignment for a project. The class id the
/// model reports is the index into this list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassPalette {
    entries: Vec<ClassColorEntry>,
}

impl ClassPalette {
    /// Resolve colors in file order. Explicit colors do not advance the
    /// default cycle.
    pub fn resolve(specs: &[ClassSpec]) -> Self {
        let mut unassigned = 0;
        let entries = specs
            .iter()
            .map(|spec| match spec.color {
                Some(color) => ClassColorEntry {
                    name: spec.name.clone(),
                    color,
                    explicit: true,
                },
                None => {
                    let color = default_color(unassigned);
                    unassigned += 1;
                    ClassColorEntry {
                        name: spec.name.clone(),
                        color,
                        explicit: false,
                    }
                }
            })
            .collect();
        Self { entries }
    }

    /// Rebuild a palette from already-resolved entries, as read back from the store.
    pub fn from_entries(entries: Vec<ClassColorEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, class_id: usize) -> Option<&ClassColorEntry> {
        self.entries.get(class_id)
    }

    pub fn entries(&self) -> &[ClassColorEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn explicit_count(&self) -> usize {
        self.entries.iter().filter(|e| e.explicit).count()
    }
}
