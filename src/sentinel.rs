//! Directive strings embedded in command output.
//!
//! A front end must not print these literally:
//! - output equal to [`CLEAR_SCREEN`] asks the display to be cleared;
//! - output starting with `[ASCII_ART_IMAGE:<path>]\n` carries an image path for front
//!   ends that can draw one, followed by the text to show otherwise.
//!
//! [`interpret`] turns any output into one of these cases.

use std::path::Path;

pub const CLEAR_SCREEN: &str = "[CLEAR_SCREEN]";

pub const ART_IMAGE_PREFIX: &str = "[ASCII_ART_IMAGE:";

/// Wrap `text` with the image marker for `image`.
pub fn art_image_marker(image: &Path, text: &str) -> String {
    format!("{ART_IMAGE_PREFIX}{}]\n{text}", image.display())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendered<'a> {
    ClearScreen,
    ArtImage { image: &'a str, text: &'a str },
    Text(&'a str),
}

pub fn interpret(output: &str) -> Rendered<'_> {
    if output == CLEAR_SCREEN {
        return Rendered::ClearScreen;
    }
    if let Some(rest) = output.strip_prefix(ART_IMAGE_PREFIX) {
        if let Some((image, text)) = rest.split_once(']') {
            let text = text.strip_prefix('\n').unwrap_or(text);
            return Rendered::ArtImage { image, text };
        }
    }
    Rendered::Text(output)
}
