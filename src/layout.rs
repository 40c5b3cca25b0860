//! Bubble layout engine.
//!
//! Every pass recomputes each row from the container width alone, so running
//! it twice with the same width and rows yields the same geometry. Rows never
//! negotiate width with each other.

use iced::advanced::graphics::text::Paragraph;
use iced::advanced::text::{Paragraph as _, Shaping, Text, Wrapping};
use iced::widget::text::LineHeight;
use iced::{alignment, font, Font, Pixels, Size};
use unicode_width::UnicodeWidthChar;

use crate::config::{LayoutConfig, MeasureMode};
use crate::i18n::I18n;
use crate::transcript::Transcript;

/// Font of message bodies and timestamps.
pub const BODY_FONT: Font = Font::MONOSPACE;

/// Font of the author tag.
pub const TAG_FONT: Font = Font {
    weight: font::Weight::Bold,
    ..Font::MONOSPACE
};

/// Measures wrapped text.
pub trait TextMeasure {
    /// Size of `text` in `font` at `text_size` when wrapped within
    /// `max_width` pixels.
    fn measure(&self, text: &str, font: Font, text_size: f32, max_width: f32) -> Size;
}

/// Shapes text with the same paragraph type the renderer draws with, so a
/// bubble sized from it never wraps differently on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontMeasure {
    /// Line height as a fraction of the text size.
    pub line_height: f32,
}

impl TextMeasure for FontMeasure {
    fn measure(&self, text: &str, font: Font, text_size: f32, max_width: f32) -> Size {
        let paragraph = Paragraph::with_text(Text {
            content: text,
            bounds: Size::new(max_width.max(0.0), f32::INFINITY),
            size: Pixels(text_size),
            line_height: LineHeight::Relative(self.line_height),
            font,
            horizontal_alignment: alignment::Horizontal::Left,
            vertical_alignment: alignment::Vertical::Top,
            shaping: Shaping::Basic,
            wrapping: Wrapping::WordOrGlyph,
        });

        // Rounded up so the drawn text always fits in the measured box.
        let bounds = paragraph.min_bounds();
        Size::new(bounds.width.ceil(), bounds.height.ceil())
    }
}

/// Fixed-advance estimate for monospace text. Needs no font system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonospaceMeasure {
    /// Glyph advance as a fraction of the text size.
    pub char_width: f32,
    /// Line height as a fraction of the text size.
    pub line_height: f32,
}

impl MonospaceMeasure {
    pub fn new(char_width: f32, line_height: f32) -> Self {
        MonospaceMeasure { char_width, line_height }
    }
}

impl TextMeasure for MonospaceMeasure {
    fn measure(&self, text: &str, _font: Font, text_size: f32, max_width: f32) -> Size {
        let advance = self.char_width * text_size;
        let columns = if advance > 0.0 {
            (max_width.max(0.0) / advance).floor() as usize
        } else {
            usize::MAX
        };

        let lines = wrap_lines(text, columns);
        let widest = lines.iter().map(|line| display_width(line)).max().unwrap_or(0);

        Size::new(
            widest as f32 * advance,
            lines.len() as f32 * self.line_height * text_size,
        )
    }
}

/// Measurer picked by `layout.measure` in the config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurer {
    Font(FontMeasure),
    Monospace(MonospaceMeasure),
}

impl Measurer {
    pub fn from_config(config: &LayoutConfig) -> Self {
        match config.measure {
            MeasureMode::Font => Measurer::Font(FontMeasure {
                line_height: config.line_height,
            }),
            MeasureMode::Monospace => {
                Measurer::Monospace(MonospaceMeasure::new(config.char_width, config.line_height))
            }
        }
    }
}

impl TextMeasure for Measurer {
    fn measure(&self, text: &str, font: Font, text_size: f32, max_width: f32) -> Size {
        match self {
            Measurer::Font(measure) => measure.measure(text, font, text_size, max_width),
            Measurer::Monospace(measure) => measure.measure(text, font, text_size, max_width),
        }
    }
}

fn display_width(text: &str) -> usize {
    text.chars().map(|ch| ch.width().unwrap_or(0)).sum()
}

/// Splits `paragraph` into alternating runs of whitespace and non-whitespace.
fn segments(paragraph: &str) -> impl Iterator<Item = &str> {
    let mut rest = paragraph;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let blank = first.is_whitespace();
        let end = rest
            .char_indices()
            .find(|(_, ch)| ch.is_whitespace() != blank)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (segment, tail) = rest.split_at(end);
        rest = tail;
        Some(segment)
    })
}

fn break_line(lines: &mut Vec<String>, current: &mut String, current_width: &mut usize) {
    let line = std::mem::take(current);
    lines.push(line.trim_end().to_string());
    *current_width = 0;
}

/// Word-wraps `text` into lines of at most `columns` display columns.
///
/// Every space is kept and counted, including indentation. Whitespace that
/// reaches the edge hangs off the end of the line and is dropped there.
/// Newlines always break. Words longer than a line are split between glyphs.
/// A budget below one column is treated as one column, so degenerate widths
/// produce one glyph per line rather than an endless line.
pub fn wrap_lines(text: &str, columns: usize) -> Vec<String> {
    let columns = columns.max(1);
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_width = 0;

        for segment in segments(paragraph) {
            if segment.starts_with(char::is_whitespace) {
                for ch in segment.chars() {
                    let ch_width = ch.width().unwrap_or(0);
                    if current_width + ch_width > columns {
                        break;
                    }
                    current.push(ch);
                    current_width += ch_width;
                }
                continue;
            }

            let word_width = display_width(segment);
            if current_width + word_width <= columns {
                current.push_str(segment);
                current_width += word_width;
                continue;
            }

            if current_width > 0 {
                break_line(&mut lines, &mut current, &mut current_width);
            }

            if word_width <= columns {
                current.push_str(segment);
                current_width = word_width;
                continue;
            }

            for ch in segment.chars() {
                let ch_width = ch.width().unwrap_or(0);
                if current_width > 0 && current_width + ch_width > columns {
                    break_line(&mut lines, &mut current, &mut current_width);
                }
                current.push(ch);
                current_width += ch_width;
            }
        }

        lines.push(current);
    }

    lines
}

/// Placement of one bubble inside its row.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BubbleGeometry {
    /// Offset of the bubble from the leading edge of the row.
    pub x: f32,
    pub width: f32,
    pub height: f32,
    /// Row width, always the available width of the pass.
    pub row_width: f32,
}

/// What the engine needs to know about one row.
#[derive(Debug, Clone, Copy)]
pub struct BubbleContent<'a> {
    /// Anchor to the trailing edge (user bubbles).
    pub trailing: bool,
    pub tag: &'a str,
    pub body: &'a str,
    /// Timestamp line under the body.
    pub footer: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutPass {
    pub available_width: f32,
    pub bubbles: Vec<BubbleGeometry>,
    pub content_height: f32,
}

#[derive(Debug, Clone)]
pub struct BubbleLayout<M> {
    config: LayoutConfig,
    measure: M,
}

impl BubbleLayout<Measurer> {
    pub fn from_config(config: LayoutConfig) -> Self {
        let measure = Measurer::from_config(&config);
        BubbleLayout::new(config, measure)
    }
}

impl<M: TextMeasure> BubbleLayout<M> {
    pub fn new(config: LayoutConfig, measure: M) -> Self {
        BubbleLayout { config, measure }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Width left for rows once container padding and the scrollbar are
    /// taken out. Never negative; NaN counts as zero.
    pub fn available_width(&self, container_width: f32) -> f32 {
        (container_width - self.config.container_padding - self.config.scrollbar_reserve).max(0.0)
    }

    pub fn max_bubble_width(&self, available_width: f32) -> f32 {
        (available_width - self.config.row_margin).max(0.0)
    }

    pub fn place(&self, available_width: f32, content: &BubbleContent<'_>) -> BubbleGeometry {
        let config = &self.config;
        let max_width = self.max_bubble_width(available_width);
        let wrap_width = (max_width - config.bubble_padding_x).max(0.0);

        let tag = self.measure.measure(content.tag, TAG_FONT, config.tag_size, wrap_width);
        let body = self.measure.measure(content.body, BODY_FONT, config.font_size, wrap_width);
        let footer = self.measure.measure(content.footer, BODY_FONT, config.footer_size, wrap_width);

        let natural_width = tag.width.max(body.width).max(footer.width) + config.bubble_padding_x;
        let width = natural_width.min(max_width);
        let height = tag.height + body.height + footer.height + config.bubble_padding_y;

        let x = if content.trailing {
            (available_width - width).max(0.0)
        } else {
            0.0
        };

        BubbleGeometry {
            x,
            width,
            height,
            row_width: available_width,
        }
    }

    pub fn compute(&self, container_width: f32, contents: &[BubbleContent<'_>]) -> LayoutPass {
        let available_width = self.available_width(container_width);
        let bubbles: Vec<BubbleGeometry> = contents
            .iter()
            .map(|content| self.place(available_width, content))
            .collect();

        let rows_height: f32 = bubbles.iter().map(|b| b.height).sum();
        let gaps = bubbles.len().saturating_sub(1) as f32;
        let content_height = rows_height + gaps * self.config.row_spacing;

        LayoutPass {
            available_width,
            bubbles,
            content_height,
        }
    }

    /// Relayouts every row of `transcript` for `container_width`.
    pub fn apply(&self, container_width: f32, transcript: &mut Transcript, i18n: &I18n) -> f32 {
        let labels: Vec<(String, String)> = transcript
            .rows()
            .iter()
            .map(|row| (i18n.author(row.message().author()), row.message().timestamp()))
            .collect();
        let contents: Vec<BubbleContent<'_>> = transcript
            .rows()
            .iter()
            .zip(&labels)
            .map(|(row, (tag, stamp))| BubbleContent {
                trailing: row.message().author().is_user(),
                tag: tag.as_str(),
                body: row.message().text(),
                footer: stamp.as_str(),
            })
            .collect();

        let pass = self.compute(container_width, &contents);

        for (row, geometry) in transcript.rows_mut().iter_mut().zip(&pass.bubbles) {
            row.set_geometry(*geometry);
        }
        transcript.set_content_height(pass.content_height);

        tracing::trace!(
            container_width,
            available_width = pass.available_width,
            rows = pass.bubbles.len(),
            content_height = pass.content_height,
            "relayout"
        );

        pass.available_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{Author, ChatMessage};

    const SAMPLES: [&str; 7] = [
        "hi",
        "The quick brown fox jumps over the lazy dog, then naps for a while in the sun.",
        "supercalifragilisticexpialidocious-and-then-some-more-without-any-spaces",
        "line one\nline two\n\nline four",
        "日本語のテキストも折り返されるべきです",
        "x",
        "    indented    with     gaps  ",
    ];

    fn engine() -> BubbleLayout<MonospaceMeasure> {
        let config = LayoutConfig::default();
        let measure = MonospaceMeasure::new(config.char_width, config.line_height);
        BubbleLayout::new(config, measure)
    }

    fn contents(tags: bool) -> Vec<BubbleContent<'static>> {
        SAMPLES
            .iter()
            .enumerate()
            .map(|(i, body)| BubbleContent {
                trailing: i % 2 == 0,
                tag: if tags { "Assistant" } else { "" },
                body,
                footer: "12:34",
            })
            .collect()
    }

    #[test]
    fn test_wrap_lines_by_word() {
        assert_eq!(wrap_lines("aa bb cc", 5), vec!["aa bb", "cc"]);
        assert_eq!(wrap_lines("aa bb cc", 80), vec!["aa bb cc"]);
        assert_eq!(wrap_lines("", 10), vec![""]);
        assert_eq!(wrap_lines("a\n\nb", 10), vec!["a", "", "b"]);
    }

    #[test]
    fn test_wrap_lines_breaks_long_words() {
        assert_eq!(wrap_lines("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(wrap_lines("ab abcdefgh", 4), vec!["ab", "abcd", "efgh"]);
    }

    #[test]
    fn test_wrap_lines_keeps_every_space() {
        assert_eq!(wrap_lines("a          b", 1000), vec!["a          b"]);
        assert_eq!(wrap_lines("    hello", 1000), vec!["    hello"]);
        assert_eq!(wrap_lines("  one\n    two", 1000), vec!["  one", "    two"]);
        // Spaces at the edge hang off the line instead of opening a new one.
        assert_eq!(wrap_lines("ab      cd", 4), vec!["ab", "cd"]);
    }

    #[test]
    fn test_wrap_lines_wide_glyphs() {
        // Each ideograph is two columns wide.
        assert_eq!(wrap_lines("日本語", 4), vec!["日本", "語"]);
    }

    #[test]
    fn test_zero_columns_wraps_one_glyph_per_line() {
        assert_eq!(wrap_lines("abc", 0), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_monospace_measure() {
        let measure = MonospaceMeasure::new(0.5, 1.0);
        // 10px text: 5px per glyph, 10px per line, 4 columns in 20px.
        let size = measure.measure("aaaa bb", BODY_FONT, 10.0, 20.0);
        assert_eq!(size, Size::new(20.0, 20.0));

        let unbounded = measure.measure("aaaa bb", BODY_FONT, 10.0, 1000.0);
        assert_eq!(unbounded, Size::new(35.0, 10.0));
    }

    #[test]
    fn test_measure_counts_interior_and_leading_spaces() {
        let measure = MonospaceMeasure::new(0.6, 1.3);
        let advance = 0.6 * 15.0;

        let gap = measure.measure("a          b", BODY_FONT, 15.0, 10_000.0);
        assert!((gap.width - 12.0 * advance).abs() < 1e-3);

        let indented = measure.measure("    hello", BODY_FONT, 15.0, 10_000.0);
        assert!((indented.width - 9.0 * advance).abs() < 1e-3);
        assert!(indented.width > measure.measure("hello", BODY_FONT, 15.0, 10_000.0).width);
    }

    #[test]
    fn test_spaced_body_widens_bubble() {
        let engine = engine();
        let plain = BubbleContent {
            trailing: false,
            tag: "",
            body: "a b",
            footer: "",
        };
        let spaced = BubbleContent {
            body: "a          b",
            ..plain
        };

        assert!(engine.place(2000.0, &spaced).width > engine.place(2000.0, &plain).width);
        assert_eq!(
            engine.place(2000.0, &spaced).height,
            engine.place(2000.0, &plain).height
        );
    }

    #[test]
    fn test_measurer_follows_config() {
        let mut config = LayoutConfig::default();
        assert!(matches!(Measurer::from_config(&config), Measurer::Font(_)));

        config.measure = MeasureMode::Monospace;
        let measurer = Measurer::from_config(&config);
        assert_eq!(
            measurer,
            Measurer::Monospace(MonospaceMeasure::new(config.char_width, config.line_height))
        );
        let size = measurer.measure("abcd", BODY_FONT, 10.0, 1000.0);
        assert!((size.width - 4.0 * config.char_width * 10.0).abs() < 1e-3);
        assert!((size.height - config.line_height * 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_bubble_width_never_exceeds_budget() {
        let engine = engine();
        let config = engine.config().clone();
        for tags in [false, true] {
            let contents = contents(tags);
            for step in 0..=400 {
                let container_width = step as f32 * 3.5;
                let budget = (container_width
                    - config.container_padding
                    - config.scrollbar_reserve
                    - config.row_margin)
                    .max(0.0);

                let pass = engine.compute(container_width, &contents);
                for bubble in &pass.bubbles {
                    assert!(
                        bubble.width <= budget,
                        "width {} over budget {} at container {}",
                        bubble.width,
                        budget,
                        container_width
                    );
                    assert!(bubble.height > 0.0);
                    assert_eq!(bubble.row_width, pass.available_width);
                }
            }
        }
    }

    #[test]
    fn test_layout_is_idempotent() {
        let engine = engine();
        let contents = contents(true);
        for container_width in [0.0, 57.0, 320.0, 799.5, 1920.0] {
            let first = engine.compute(container_width, &contents);
            let second = engine.compute(container_width, &contents);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_alignment_by_author() {
        let engine = engine();
        let contents = contents(true);
        for container_width in [150.0, 400.0, 1024.0] {
            let pass = engine.compute(container_width, &contents);
            for (content, bubble) in contents.iter().zip(&pass.bubbles) {
                if content.trailing {
                    assert!((bubble.x + bubble.width - pass.available_width).abs() < 1e-3);
                } else {
                    assert_eq!(bubble.x, 0.0);
                }
            }
        }
    }

    #[test]
    fn test_short_message_keeps_natural_width() {
        let engine = engine();
        let config = engine.config().clone();
        let content = BubbleContent {
            trailing: true,
            tag: "",
            body: "hi",
            footer: "",
        };

        let bubble = engine.place(1000.0, &content);
        let advance = config.char_width * config.font_size;
        assert!((bubble.width - (2.0 * advance + config.bubble_padding_x)).abs() < 1e-3);
        assert!((bubble.x - (1000.0 - bubble.width)).abs() < 1e-3);
    }

    #[test]
    fn test_timestamp_line_counts_toward_height() {
        let engine = engine();
        let config = engine.config().clone();
        let bare = BubbleContent {
            trailing: false,
            tag: "You",
            body: "hi",
            footer: "",
        };
        let stamped = BubbleContent {
            footer: "09:41",
            ..bare
        };

        let with_stamp = engine.place(1000.0, &stamped);
        let without = engine.place(1000.0, &bare);
        // An empty footer still reserves its line; the stamp never adds more.
        assert_eq!(with_stamp.height, without.height);
        let footer_line = config.footer_size * config.line_height;
        let tag_line = config.tag_size * config.line_height;
        let body_line = config.font_size * config.line_height;
        assert!(
            (with_stamp.height - (tag_line + body_line + footer_line + config.bubble_padding_y)).abs()
                < 1e-3
        );
    }

    #[test]
    fn test_narrow_container_grows_height() {
        let engine = engine();
        let content = BubbleContent {
            trailing: false,
            tag: "You",
            body: SAMPLES[1],
            footer: "12:34",
        };

        let wide = engine.place(2000.0, &content);
        let narrow = engine.place(200.0, &content);
        assert!(narrow.width < wide.width);
        assert!(narrow.height > wide.height);
    }

    #[test]
    fn test_degenerate_width_collapses_bubbles() {
        let engine = engine();
        let contents = contents(true);
        let pass = engine.compute(5.0, &contents);

        assert_eq!(pass.available_width, 0.0);
        for bubble in &pass.bubbles {
            assert_eq!(bubble.width, 0.0);
            assert_eq!(bubble.x, 0.0);
            assert!(bubble.height > 0.0);
        }

        let nan = engine.compute(f32::NAN, &contents);
        assert_eq!(nan.available_width, 0.0);
    }

    #[test]
    fn test_content_height_sums_rows_and_spacing() {
        let engine = engine();
        let contents = contents(true);
        let pass = engine.compute(640.0, &contents);

        let rows: f32 = pass.bubbles.iter().map(|b| b.height).sum();
        let expected = rows + (contents.len() - 1) as f32 * engine.config().row_spacing;
        assert!((pass.content_height - expected).abs() < 1e-3);
    }

    #[test]
    fn test_empty_transcript() {
        let engine = engine();
        let pass = engine.compute(640.0, &[]);
        assert!(pass.bubbles.is_empty());
        assert_eq!(pass.content_height, 0.0);
    }

    #[test]
    fn test_apply_updates_rows() {
        let engine = engine();
        let i18n = I18n::for_locale("en");
        let mut transcript = Transcript::new();
        transcript.push(ChatMessage::new(Author::User, "hello").unwrap());
        transcript.push(ChatMessage::new(Author::Assistant, "hi there").unwrap());

        let available = engine.apply(800.0, &mut transcript, &i18n);
        let first = transcript.rows().to_vec();
        assert_eq!(available, engine.available_width(800.0));
        assert!(first[0].geometry().x > 0.0);
        assert_eq!(first[1].geometry().x, 0.0);
        assert!(transcript.content_height() > 0.0);

        engine.apply(800.0, &mut transcript, &i18n);
        for (before, after) in first.iter().zip(transcript.rows()) {
            assert_eq!(before.geometry(), after.geometry());
        }

        engine.apply(300.0, &mut transcript, &i18n);
        assert_eq!(transcript.rows()[0].geometry().row_width, engine.available_width(300.0));
    }
}
