use std::collections::VecDeque;
use std::fmt;
use tailcall::trampoline::{self, Next};

const MAJOR_VERSION: u32 = 1;
const MINOR_VERSION: u32 = 1;

const MIN_BEST_INDENT: usize = 2;
const MAX_BEST_INDENT: usize = 9;
const DEFAULT_BEST_WIDTH: usize = 80;

// A node longer than this never qualifies as a compact mapping key.
const MAX_SIMPLE_KEY_LENGTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarStyle {
    Any,
    Plain,
    SingleQuoted,
    DoubleQuoted,
    Literal,
    Folded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStyle {
    Any,
    Block,
    Flow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagDirective {
    pub handle: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionDirective {
    pub major: u32,
    pub minor: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StreamStart,
    StreamEnd,
    DocumentStart {
        version: Option<VersionDirective>,
        tags: Vec<TagDirective>,
        implicit: bool,
    },
    DocumentEnd {
        implicit: bool,
    },
    Alias {
        anchor: String,
    },
    Scalar {
        anchor: Option<String>,
        tag: Option<String>,
        value: String,
        style: ScalarStyle,
        plain_implicit: bool,
        quoted_implicit: bool,
    },
    SequenceStart {
        anchor: Option<String>,
        tag: Option<String>,
        style: CollectionStyle,
    },
    SequenceEnd,
    MappingStart {
        anchor: Option<String>,
        tag: Option<String>,
        style: CollectionStyle,
    },
    MappingEnd,
}

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("protocol violation: expected {expected}")]
    ProtocolViolation { expected: &'static str },
    #[error("incompatible %YAML directive: {major}.{minor} is not supported")]
    IncompatibleVersion { major: u32, minor: u32 },
    #[error("duplicate %TAG directive for handle '{handle}'")]
    DuplicateDirective { handle: String },
    #[error("scalar carries neither a tag nor an implicit style flag")]
    AmbiguousScalar,
    #[error("alias event without an anchor name")]
    MalformedAlias,
    #[error("io error: {0}")]
    Io(#[from] fmt::Error),
}

/// Output tuning knobs. Out-of-range values fall back to the defaults
/// rather than erroring: an indent outside `2..=9` becomes 2, and a width
/// not exceeding twice the indent becomes 80.
#[derive(Debug, Clone)]
pub struct EmitterOptions {
    pub best_indent: usize,
    pub best_width: usize,
    pub canonical: bool,
    pub unicode: bool,
}

impl Default for EmitterOptions {
    fn default() -> Self {
        Self {
            best_indent: MIN_BEST_INDENT,
            best_width: DEFAULT_BEST_WIDTH,
            canonical: false,
            unicode: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StreamStart,
    FirstDocumentStart,
    DocumentStart,
    DocumentContent,
    DocumentEnd,
    FlowSequenceFirstItem,
    FlowSequenceItem,
    FlowMappingFirstKey,
    FlowMappingKey,
    FlowMappingSimpleValue,
    FlowMappingValue,
    BlockSequenceFirstItem,
    BlockSequenceItem,
    BlockMappingFirstKey,
    BlockMappingKey,
    BlockMappingSimpleValue,
    BlockMappingValue,
    End,
}

/// Legality facts for one scalar value, computed in a single left-to-right
/// pass and never mutated afterwards.
#[derive(Debug, Clone)]
struct ScalarFacts {
    multiline: bool,
    flow_plain_allowed: bool,
    block_plain_allowed: bool,
    single_quoted_allowed: bool,
    block_allowed: bool,
}

impl Default for ScalarFacts {
    // The facts for an empty value.
    fn default() -> Self {
        Self {
            multiline: false,
            flow_plain_allowed: false,
            block_plain_allowed: true,
            single_quoted_allowed: true,
            block_allowed: false,
        }
    }
}

#[derive(Debug, Clone)]
enum TagRender {
    Shorthand {
        handle: String,
        suffix: Option<String>,
    },
    Verbatim(String),
}

#[derive(Debug, Clone)]
struct AnchorFacts {
    name: String,
    alias: bool,
}

/// Per-event analysis, recomputed fresh for every event and threaded by
/// value through style selection and rendering.
#[derive(Debug, Clone, Default)]
struct Analysis {
    anchor: Option<AnchorFacts>,
    tag: Option<TagRender>,
    scalar: Option<ScalarFacts>,
}

pub struct Emitter<'a> {
    output: &'a mut dyn fmt::Write,

    canonical: bool,
    best_indent: usize,
    best_width: usize,
    unicode: bool,

    state: State,
    states: Vec<State>,
    events: VecDeque<Event>,
    indents: Vec<Option<usize>>,
    tag_directives: Vec<TagDirective>,
    indent: Option<usize>,
    flow_level: usize,
    mapping_context: bool,
    simple_key_context: bool,

    line: usize,
    column: usize,
    whitespace: bool,
    indentation: bool,
}

impl<'a> Emitter<'a> {
    pub fn new(output: &'a mut dyn fmt::Write) -> Self {
        Self::with_options(output, EmitterOptions::default())
    }

    pub fn with_options(output: &'a mut dyn fmt::Write, options: EmitterOptions) -> Self {
        let best_indent = if (MIN_BEST_INDENT..=MAX_BEST_INDENT).contains(&options.best_indent) {
            options.best_indent
        } else {
            MIN_BEST_INDENT
        };
        let best_width = if options.best_width > best_indent * 2 {
            options.best_width
        } else {
            DEFAULT_BEST_WIDTH
        };
        Self {
            output,
            canonical: options.canonical,
            best_indent,
            best_width,
            unicode: options.unicode,
            state: State::StreamStart,
            states: Vec::new(),
            events: VecDeque::new(),
            indents: Vec::new(),
            tag_directives: Vec::new(),
            indent: None,
            flow_level: 0,
            mapping_context: false,
            simple_key_context: false,
            line: 0,
            column: 0,
            whitespace: true,
            indentation: true,
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn column(&self) -> usize {
        self.column
    }

    /// Submit the next event. Output is produced as soon as enough context
    /// has accumulated; an error aborts the whole emission.
    pub fn emit(&mut self, event: Event) -> Result<(), EmitError> {
        self.events.push_back(event);
        trampoline::run(EmitMachine::step, EmitMachine { emitter: self })
    }

    /*
     * Event buffering.
     */

    // Extra events are buffered so flow-vs-block layout can be decided
    // before any bytes are written: one extra event for a document start,
    // two for a sequence start, three for a mapping start. An opening
    // event whose matching close is already queued needs nothing more.
    fn need_more_events(&self) -> bool {
        let Some(front) = self.events.front() else {
            return true;
        };
        let accumulate = match front {
            Event::DocumentStart { .. } => 1,
            Event::SequenceStart { .. } => 2,
            Event::MappingStart { .. } => 3,
            _ => return false,
        };
        if self.events.len() > accumulate {
            return false;
        }
        let mut level: i32 = 0;
        for event in &self.events {
            match event {
                Event::DocumentStart { .. }
                | Event::SequenceStart { .. }
                | Event::MappingStart { .. } => level += 1,
                Event::DocumentEnd { .. } | Event::SequenceEnd | Event::MappingEnd => level -= 1,
                _ => {}
            }
            if level == 0 {
                return false;
            }
        }
        true
    }

    // The current opening event has already been taken off the queue, so an
    // empty collection shows up as its matching close at the front.
    fn check_empty_sequence(&self) -> bool {
        matches!(self.events.front(), Some(Event::SequenceEnd))
    }

    fn check_empty_mapping(&self) -> bool {
        matches!(self.events.front(), Some(Event::MappingEnd))
    }

    fn check_empty_document(&self) -> bool {
        matches!(self.events.front(), Some(Event::Scalar { value, .. }) if value.is_empty())
    }

    /*
     * Per-event analysis.
     */

    fn analyze(&self, event: &Event) -> Analysis {
        match event {
            Event::Alias { anchor } => Analysis {
                anchor: Some(AnchorFacts {
                    name: anchor.clone(),
                    alias: true,
                }),
                ..Analysis::default()
            },
            Event::Scalar {
                anchor,
                tag,
                value,
                plain_implicit,
                quoted_implicit,
                ..
            } => {
                let tag = tag
                    .as_ref()
                    .filter(|_| self.canonical || (!plain_implicit && !quoted_implicit))
                    .map(|t| self.analyze_tag(t));
                Analysis {
                    anchor: anchor.as_ref().map(|name| AnchorFacts {
                        name: name.clone(),
                        alias: false,
                    }),
                    tag,
                    scalar: Some(analyze_scalar(value, self.unicode)),
                }
            }
            Event::SequenceStart { anchor, tag, .. } | Event::MappingStart { anchor, tag, .. } => {
                Analysis {
                    anchor: anchor.as_ref().map(|name| AnchorFacts {
                        name: name.clone(),
                        alias: false,
                    }),
                    tag: tag.as_ref().map(|t| self.analyze_tag(t)),
                    scalar: None,
                }
            }
            _ => Analysis::default(),
        }
    }

    // Resolve a tag against the registered directives, first match wins;
    // an unmatched tag falls back to the verbatim !<...> form.
    fn analyze_tag(&self, tag: &str) -> TagRender {
        for directive in &self.tag_directives {
            if let Some(suffix) = tag.strip_prefix(directive.prefix.as_str()) {
                return TagRender::Shorthand {
                    handle: directive.handle.clone(),
                    suffix: Some(suffix.to_string()),
                };
            }
        }
        TagRender::Verbatim(tag.to_string())
    }

    /*
     * State dispatcher.
     */

    fn state_machine(&mut self, event: Event, analysis: Analysis) -> Result<(), EmitError> {
        match self.state {
            State::StreamStart => self.emit_stream_start(event),
            State::FirstDocumentStart => self.emit_document_start(event, true),
            State::DocumentStart => self.emit_document_start(event, false),
            State::DocumentContent => self.emit_document_content(event, analysis),
            State::DocumentEnd => self.emit_document_end(event),
            State::FlowSequenceFirstItem => self.emit_flow_sequence_item(event, analysis, true),
            State::FlowSequenceItem => self.emit_flow_sequence_item(event, analysis, false),
            State::FlowMappingFirstKey => self.emit_flow_mapping_key(event, analysis, true),
            State::FlowMappingKey => self.emit_flow_mapping_key(event, analysis, false),
            State::FlowMappingSimpleValue => self.emit_flow_mapping_value(event, analysis, true),
            State::FlowMappingValue => self.emit_flow_mapping_value(event, analysis, false),
            State::BlockSequenceFirstItem => self.emit_block_sequence_item(event, analysis, true),
            State::BlockSequenceItem => self.emit_block_sequence_item(event, analysis, false),
            State::BlockMappingFirstKey => self.emit_block_mapping_key(event, analysis, true),
            State::BlockMappingKey => self.emit_block_mapping_key(event, analysis, false),
            State::BlockMappingSimpleValue => self.emit_block_mapping_value(event, analysis, true),
            State::BlockMappingValue => self.emit_block_mapping_value(event, analysis, false),
            State::End => Err(EmitError::ProtocolViolation {
                expected: "nothing after STREAM-END",
            }),
        }
    }

    fn emit_stream_start(&mut self, event: Event) -> Result<(), EmitError> {
        if !matches!(event, Event::StreamStart) {
            return Err(EmitError::ProtocolViolation {
                expected: "STREAM-START",
            });
        }
        self.indent = None;
        self.line = 0;
        self.column = 0;
        self.whitespace = true;
        self.indentation = true;
        self.state = State::FirstDocumentStart;
        Ok(())
    }

    fn emit_document_start(&mut self, event: Event, first: bool) -> Result<(), EmitError> {
        match event {
            Event::DocumentStart {
                version,
                tags,
                implicit,
            } => {
                let mut implicit = implicit && first && !self.canonical;

                if let Some(version) = version {
                    if version.major != MAJOR_VERSION || version.minor != MINOR_VERSION {
                        return Err(EmitError::IncompatibleVersion {
                            major: version.major,
                            minor: version.minor,
                        });
                    }
                    implicit = false;
                    self.write_indicator("%YAML", true, false, false)?;
                    self.write_indicator(&format!("{MAJOR_VERSION}.{MINOR_VERSION}"), true, false, false)?;
                    self.write_indent()?;
                }

                let mut registered = Vec::new();
                for directive in &tags {
                    if self.append_tag_directive(directive.clone(), false)? {
                        registered.push(directive.clone());
                    }
                }
                for directive in default_tag_directives() {
                    self.append_tag_directive(directive, true)?;
                }

                if !registered.is_empty() {
                    implicit = false;
                    for directive in &registered {
                        self.write_indicator("%TAG", true, false, false)?;
                        self.write_tag_handle(&directive.handle)?;
                        self.write_tag_content(&directive.prefix, true)?;
                        self.write_indent()?;
                    }
                }

                if self.check_empty_document() {
                    implicit = false;
                }

                if !implicit {
                    self.write_indent()?;
                    self.write_indicator("---", true, false, false)?;
                    if self.canonical {
                        self.write_indent()?;
                    }
                }

                self.state = State::DocumentContent;
                Ok(())
            }
            Event::StreamEnd => {
                self.state = State::End;
                Ok(())
            }
            _ => Err(EmitError::ProtocolViolation {
                expected: "DOCUMENT-START or STREAM-END",
            }),
        }
    }

    fn emit_document_content(&mut self, event: Event, analysis: Analysis) -> Result<(), EmitError> {
        self.states.push(State::DocumentEnd);
        self.emit_node(event, analysis, false, false)
    }

    fn emit_document_end(&mut self, event: Event) -> Result<(), EmitError> {
        match event {
            Event::DocumentEnd { implicit } => {
                self.write_indent()?;
                if !implicit {
                    self.write_indicator("...", true, false, false)?;
                    self.write_indent()?;
                }
                self.state = State::DocumentStart;
                self.tag_directives.clear();
                Ok(())
            }
            _ => Err(EmitError::ProtocolViolation {
                expected: "DOCUMENT-END",
            }),
        }
    }

    fn emit_node(
        &mut self,
        event: Event,
        analysis: Analysis,
        mapping: bool,
        simple_key: bool,
    ) -> Result<(), EmitError> {
        self.mapping_context = mapping;
        self.simple_key_context = simple_key;

        match event {
            Event::Alias { .. } => self.emit_alias(&analysis),
            Event::Scalar {
                value,
                style,
                plain_implicit,
                quoted_implicit,
                ..
            } => self.emit_scalar(value, style, plain_implicit, quoted_implicit, analysis),
            Event::SequenceStart { style, .. } => self.emit_sequence_start(style, &analysis),
            Event::MappingStart { style, .. } => self.emit_mapping_start(style, &analysis),
            _ => Err(EmitError::ProtocolViolation {
                expected: "SCALAR, SEQUENCE-START, MAPPING-START, or ALIAS",
            }),
        }
    }

    fn emit_alias(&mut self, analysis: &Analysis) -> Result<(), EmitError> {
        match &analysis.anchor {
            Some(anchor) if !anchor.name.is_empty() => {}
            _ => return Err(EmitError::MalformedAlias),
        }
        self.process_anchor(analysis)?;
        self.pop_state()
    }

    fn emit_scalar(
        &mut self,
        value: String,
        style: ScalarStyle,
        plain_implicit: bool,
        quoted_implicit: bool,
        mut analysis: Analysis,
    ) -> Result<(), EmitError> {
        let facts = analysis.scalar.take().unwrap_or_default();
        let style = self.select_scalar_style(
            &value,
            style,
            &facts,
            plain_implicit,
            quoted_implicit,
            &mut analysis.tag,
        )?;
        self.process_anchor(&analysis)?;
        self.process_tag(&analysis.tag)?;
        self.increase_indent(true, false);
        self.process_scalar(&value, style)?;
        self.pop_indent()?;
        self.pop_state()
    }

    fn emit_sequence_start(
        &mut self,
        style: CollectionStyle,
        analysis: &Analysis,
    ) -> Result<(), EmitError> {
        self.process_anchor(analysis)?;
        self.process_tag(&analysis.tag)?;
        if self.flow_level > 0
            || self.canonical
            || style == CollectionStyle::Flow
            || self.check_empty_sequence()
        {
            self.state = State::FlowSequenceFirstItem;
        } else {
            self.state = State::BlockSequenceFirstItem;
        }
        Ok(())
    }

    fn emit_mapping_start(
        &mut self,
        style: CollectionStyle,
        analysis: &Analysis,
    ) -> Result<(), EmitError> {
        self.process_anchor(analysis)?;
        self.process_tag(&analysis.tag)?;
        if self.flow_level > 0
            || self.canonical
            || style == CollectionStyle::Flow
            || self.check_empty_mapping()
        {
            self.state = State::FlowMappingFirstKey;
        } else {
            self.state = State::BlockMappingFirstKey;
        }
        Ok(())
    }

    fn emit_flow_sequence_item(
        &mut self,
        event: Event,
        analysis: Analysis,
        first: bool,
    ) -> Result<(), EmitError> {
        if first {
            self.write_indicator("[", true, true, false)?;
            self.increase_indent(true, false);
            self.flow_level += 1;
        }
        if matches!(event, Event::SequenceEnd) {
            self.flow_level -= 1;
            self.pop_indent()?;
            if self.canonical && !first {
                self.write_indicator(",", false, false, false)?;
                self.write_indent()?;
            }
            self.write_indicator("]", false, false, false)?;
            return self.pop_state();
        }
        if !first {
            self.write_indicator(",", false, false, false)?;
        }
        if self.canonical || self.column > self.best_width {
            self.write_indent()?;
        }
        self.states.push(State::FlowSequenceItem);
        self.emit_node(event, analysis, false, false)
    }

    fn emit_flow_mapping_key(
        &mut self,
        event: Event,
        analysis: Analysis,
        first: bool,
    ) -> Result<(), EmitError> {
        if first {
            self.write_indicator("{", true, true, false)?;
            self.increase_indent(true, false);
            self.flow_level += 1;
        }
        if matches!(event, Event::MappingEnd) {
            self.flow_level -= 1;
            self.pop_indent()?;
            if self.canonical && !first {
                self.write_indicator(",", false, false, false)?;
                self.write_indent()?;
            }
            self.write_indicator("}", false, false, false)?;
            return self.pop_state();
        }
        if !first {
            self.write_indicator(",", false, false, false)?;
        }
        if self.canonical || self.column > self.best_width {
            self.write_indent()?;
        }
        if !self.canonical && self.check_simple_key(&event, &analysis) {
            self.states.push(State::FlowMappingSimpleValue);
            self.emit_node(event, analysis, true, true)
        } else {
            self.write_indicator("?", true, false, false)?;
            self.states.push(State::FlowMappingValue);
            self.emit_node(event, analysis, true, false)
        }
    }

    fn emit_flow_mapping_value(
        &mut self,
        event: Event,
        analysis: Analysis,
        simple: bool,
    ) -> Result<(), EmitError> {
        if simple {
            self.write_indicator(":", false, false, false)?;
        } else {
            if self.canonical || self.column > self.best_width {
                self.write_indent()?;
            }
            self.write_indicator(":", true, false, false)?;
        }
        self.states.push(State::FlowMappingKey);
        self.emit_node(event, analysis, true, false)
    }

    fn emit_block_sequence_item(
        &mut self,
        event: Event,
        analysis: Analysis,
        first: bool,
    ) -> Result<(), EmitError> {
        if first {
            // A sequence that is the value of a mapping key keeps the dash
            // on the key's indent column.
            let indentless = self.mapping_context && !self.indentation;
            self.increase_indent(false, indentless);
        }
        if matches!(event, Event::SequenceEnd) {
            self.pop_indent()?;
            return self.pop_state();
        }
        self.write_indent()?;
        self.write_indicator("-", true, false, true)?;
        self.states.push(State::BlockSequenceItem);
        self.emit_node(event, analysis, false, false)
    }

    fn emit_block_mapping_key(
        &mut self,
        event: Event,
        analysis: Analysis,
        first: bool,
    ) -> Result<(), EmitError> {
        if first {
            self.increase_indent(false, false);
        }
        if matches!(event, Event::MappingEnd) {
            self.pop_indent()?;
            return self.pop_state();
        }
        self.write_indent()?;
        if self.check_simple_key(&event, &analysis) {
            self.states.push(State::BlockMappingSimpleValue);
            self.emit_node(event, analysis, true, true)
        } else {
            self.write_indicator("?", true, false, true)?;
            self.states.push(State::BlockMappingValue);
            self.emit_node(event, analysis, true, false)
        }
    }

    fn emit_block_mapping_value(
        &mut self,
        event: Event,
        analysis: Analysis,
        simple: bool,
    ) -> Result<(), EmitError> {
        if simple {
            self.write_indicator(":", false, false, false)?;
        } else {
            self.write_indent()?;
            self.write_indicator(":", true, false, true)?;
        }
        self.states.push(State::BlockMappingKey);
        self.emit_node(event, analysis, true, false)
    }

    // A node may render as a compact mapping key only when it fits on one
    // line: an alias, a single-line scalar, or a provably empty collection,
    // all within a fixed length limit.
    fn check_simple_key(&self, event: &Event, analysis: &Analysis) -> bool {
        let mut length = analysis
            .anchor
            .as_ref()
            .map_or(0, |a| a.name.chars().count());
        length += match &analysis.tag {
            Some(TagRender::Shorthand { handle, suffix }) => {
                handle.chars().count() + suffix.as_ref().map_or(0, |s| s.chars().count())
            }
            Some(TagRender::Verbatim(content)) => content.chars().count() + 3,
            None => 0,
        };
        match event {
            Event::Alias { .. } => {}
            Event::Scalar { value, .. } => {
                if analysis.scalar.as_ref().is_some_and(|facts| facts.multiline) {
                    return false;
                }
                length += value.chars().count();
            }
            Event::SequenceStart { .. } => {
                if !self.check_empty_sequence() {
                    return false;
                }
            }
            Event::MappingStart { .. } => {
                if !self.check_empty_mapping() {
                    return false;
                }
            }
            _ => return false,
        }
        length <= MAX_SIMPLE_KEY_LENGTH
    }

    /*
     * Style selection.
     */

    fn select_scalar_style(
        &self,
        value: &str,
        requested: ScalarStyle,
        facts: &ScalarFacts,
        plain_implicit: bool,
        quoted_implicit: bool,
        tag: &mut Option<TagRender>,
    ) -> Result<ScalarStyle, EmitError> {
        let no_tag = tag.is_none();
        if no_tag && !plain_implicit && !quoted_implicit {
            return Err(EmitError::AmbiguousScalar);
        }

        let mut style = if requested == ScalarStyle::Any {
            ScalarStyle::Plain
        } else {
            requested
        };
        if self.canonical {
            style = ScalarStyle::DoubleQuoted;
        }
        if self.simple_key_context && facts.multiline {
            style = ScalarStyle::DoubleQuoted;
        }

        if style == ScalarStyle::Plain {
            let plain_allowed = if self.flow_level > 0 {
                facts.flow_plain_allowed
            } else {
                facts.block_plain_allowed
            };
            if !plain_allowed {
                style = ScalarStyle::SingleQuoted;
            }
            if !value.is_empty() && (self.flow_level > 0 || self.simple_key_context) {
                style = ScalarStyle::SingleQuoted;
            }
            if no_tag && !plain_implicit {
                style = ScalarStyle::SingleQuoted;
            }
        }

        if style == ScalarStyle::SingleQuoted && !facts.single_quoted_allowed {
            style = ScalarStyle::DoubleQuoted;
        }

        // A value containing a line break only ever renders double-quoted,
        // literal, or folded.
        if facts.multiline && matches!(style, ScalarStyle::Plain | ScalarStyle::SingleQuoted) {
            style = ScalarStyle::DoubleQuoted;
        }

        if matches!(style, ScalarStyle::Literal | ScalarStyle::Folded)
            && (!facts.block_allowed || self.flow_level > 0 || self.simple_key_context)
        {
            style = ScalarStyle::DoubleQuoted;
        }

        if no_tag && !quoted_implicit && style != ScalarStyle::Plain {
            *tag = Some(TagRender::Shorthand {
                handle: "!".to_string(),
                suffix: None,
            });
        }

        Ok(style)
    }

    /*
     * Node prologue: anchor and tag.
     */

    fn process_anchor(&mut self, analysis: &Analysis) -> Result<(), EmitError> {
        if let Some(anchor) = &analysis.anchor {
            self.write_indicator(if anchor.alias { "*" } else { "&" }, true, false, false)?;
            self.write_anchor(&anchor.name)?;
        }
        Ok(())
    }

    fn process_tag(&mut self, tag: &Option<TagRender>) -> Result<(), EmitError> {
        match tag {
            None => Ok(()),
            Some(TagRender::Shorthand { handle, suffix }) => {
                self.write_tag_handle(handle)?;
                if let Some(suffix) = suffix {
                    self.write_tag_content(suffix, false)?;
                }
                Ok(())
            }
            Some(TagRender::Verbatim(content)) => {
                self.write_indicator("!<", true, false, false)?;
                self.write_tag_content(content, false)?;
                self.write_indicator(">", false, false, false)
            }
        }
    }

    // Returns whether the directive was newly registered; a handle seen
    // before with the same prefix is ignored, with a different prefix it
    // is an error unless duplicates are allowed.
    fn append_tag_directive(
        &mut self,
        value: TagDirective,
        allow_duplicates: bool,
    ) -> Result<bool, EmitError> {
        if let Some(existing) = self.tag_directives.iter().find(|d| d.handle == value.handle) {
            if allow_duplicates || existing.prefix == value.prefix {
                return Ok(false);
            }
            return Err(EmitError::DuplicateDirective {
                handle: value.handle,
            });
        }
        self.tag_directives.push(value);
        Ok(true)
    }

    /*
     * Scalar rendering.
     */

    fn process_scalar(&mut self, value: &str, style: ScalarStyle) -> Result<(), EmitError> {
        let allow_breaks = !self.simple_key_context;
        match style {
            ScalarStyle::Plain => self.write_plain_scalar(value, allow_breaks),
            ScalarStyle::SingleQuoted => self.write_single_quoted_scalar(value, allow_breaks),
            ScalarStyle::DoubleQuoted => self.write_double_quoted_scalar(value, allow_breaks),
            ScalarStyle::Literal => self.write_literal_scalar(value),
            ScalarStyle::Folded => self.write_folded_scalar(value),
            ScalarStyle::Any => Err(EmitError::ProtocolViolation {
                expected: "a resolved scalar style",
            }),
        }
    }

    fn write_plain_scalar(&mut self, value: &str, allow_breaks: bool) -> Result<(), EmitError> {
        if !self.whitespace {
            self.write_char(' ')?;
        }
        let chars: Vec<char> = value.chars().collect();
        let mut spaces = false;
        let mut breaks = false;
        for (i, &ch) in chars.iter().enumerate() {
            if ch == ' ' {
                if allow_breaks
                    && !spaces
                    && self.column > self.best_width
                    && i + 1 < chars.len()
                    && chars[i + 1] != ' '
                {
                    self.write_indent()?;
                } else {
                    self.write_char(ch)?;
                }
                spaces = true;
            } else if is_break(ch) {
                if !breaks && ch == '\n' {
                    self.write_break()?;
                }
                self.write_break()?;
                self.indentation = true;
                breaks = true;
            } else {
                if breaks {
                    self.write_indent()?;
                }
                self.write_char(ch)?;
                self.indentation = false;
                spaces = false;
                breaks = false;
            }
        }
        self.whitespace = false;
        self.indentation = false;
        Ok(())
    }

    fn write_single_quoted_scalar(
        &mut self,
        value: &str,
        allow_breaks: bool,
    ) -> Result<(), EmitError> {
        self.write_indicator("'", true, false, false)?;
        let chars: Vec<char> = value.chars().collect();
        let mut spaces = false;
        let mut breaks = false;
        for (i, &ch) in chars.iter().enumerate() {
            if ch == ' ' {
                if allow_breaks
                    && !spaces
                    && self.column > self.best_width
                    && i > 0
                    && i + 1 < chars.len()
                    && chars[i + 1] != ' '
                {
                    self.write_indent()?;
                } else {
                    self.write_char(ch)?;
                }
                spaces = true;
            } else if is_break(ch) {
                // A lone break renders as one blank line so it survives the
                // fold back to a break on re-parse.
                if !breaks && ch == '\n' {
                    self.write_break()?;
                }
                self.write_break()?;
                self.indentation = true;
                breaks = true;
            } else {
                if breaks {
                    self.write_indent()?;
                }
                if ch == '\'' {
                    self.write_char('\'')?;
                }
                self.write_char(ch)?;
                self.indentation = false;
                spaces = false;
                breaks = false;
            }
        }
        self.write_indicator("'", false, false, false)?;
        self.whitespace = false;
        self.indentation = false;
        Ok(())
    }

    fn write_double_quoted_scalar(
        &mut self,
        value: &str,
        allow_breaks: bool,
    ) -> Result<(), EmitError> {
        self.write_indicator("\"", true, false, false)?;
        let chars: Vec<char> = value.chars().collect();
        let mut spaces = false;
        for (i, &ch) in chars.iter().enumerate() {
            if !is_printable(ch)
                || (!self.unicode && !ch.is_ascii())
                || is_break(ch)
                || ch == '"'
                || ch == '\\'
            {
                self.write_char('\\')?;
                match ch {
                    '\0' => self.write_char('0')?,
                    '\u{7}' => self.write_char('a')?,
                    '\u{8}' => self.write_char('b')?,
                    '\t' => self.write_char('t')?,
                    '\n' => self.write_char('n')?,
                    '\u{b}' => self.write_char('v')?,
                    '\u{c}' => self.write_char('f')?,
                    '\r' => self.write_char('r')?,
                    '\u{1b}' => self.write_char('e')?,
                    '"' => self.write_char('"')?,
                    '\\' => self.write_char('\\')?,
                    '\u{85}' => self.write_char('N')?,
                    '\u{a0}' => self.write_char('_')?,
                    '\u{2028}' => self.write_char('L')?,
                    '\u{2029}' => self.write_char('P')?,
                    _ => {
                        let code = ch as u32;
                        if code <= 0xFF {
                            self.write_str(&format!("x{code:02X}"))?;
                        } else if code <= 0xFFFF {
                            self.write_str(&format!("u{code:04X}"))?;
                        } else {
                            self.write_str(&format!("U{code:08X}"))?;
                        }
                    }
                }
                spaces = false;
            } else if ch == ' ' {
                if allow_breaks
                    && !spaces
                    && self.column > self.best_width
                    && i > 0
                    && i + 1 < chars.len()
                {
                    self.write_indent()?;
                    // An escaped break would swallow a following space, so
                    // protect it.
                    if chars[i + 1] == ' ' {
                        self.write_char('\\')?;
                    }
                } else {
                    self.write_char(ch)?;
                }
                spaces = true;
            } else {
                self.write_char(ch)?;
                spaces = false;
            }
        }
        self.write_indicator("\"", false, false, false)?;
        self.whitespace = false;
        self.indentation = false;
        Ok(())
    }

    fn write_literal_scalar(&mut self, value: &str) -> Result<(), EmitError> {
        let indicator = match determine_chomping(value) {
            Chomping::Strip => "|-",
            Chomping::Clip => "|",
            Chomping::Keep => "|+",
        };
        self.write_indicator(indicator, true, false, false)?;
        self.write_indent()?;
        let mut breaks = false;
        for ch in value.chars() {
            if is_break(ch) {
                self.write_break()?;
                self.indentation = true;
                breaks = true;
            } else {
                if breaks {
                    self.write_indent()?;
                }
                self.write_char(ch)?;
                self.indentation = false;
                breaks = false;
            }
        }
        Ok(())
    }

    fn write_folded_scalar(&mut self, value: &str) -> Result<(), EmitError> {
        let indicator = match determine_chomping(value) {
            Chomping::Strip => ">-",
            Chomping::Clip => ">",
            Chomping::Keep => ">+",
        };
        self.write_indicator(indicator, true, false, false)?;
        self.write_indent()?;
        let chars: Vec<char> = value.chars().collect();
        let mut breaks = true;
        let mut leading_spaces = false;
        for (i, &ch) in chars.iter().enumerate() {
            if is_break(ch) {
                // A single internal break folds back to a space on re-parse;
                // an extra blank line preserves it as a break, unless the
                // following line is more-indented and already literal.
                if !breaks && !leading_spaces && ch == '\n' {
                    let mut k = i;
                    while k < chars.len() && is_break(chars[k]) {
                        k += 1;
                    }
                    if k < chars.len() && chars[k] != ' ' {
                        self.write_break()?;
                    }
                }
                self.write_break()?;
                self.indentation = true;
                breaks = true;
            } else {
                if breaks {
                    self.write_indent()?;
                    leading_spaces = ch == ' ';
                }
                if !breaks
                    && ch == ' '
                    && i + 1 < chars.len()
                    && chars[i + 1] != ' '
                    && self.column > self.best_width
                {
                    self.write_indent()?;
                } else {
                    self.write_char(ch)?;
                }
                self.indentation = false;
                breaks = false;
            }
        }
        Ok(())
    }

    /*
     * Low-level writing.
     */

    fn write_char(&mut self, value: char) -> Result<(), EmitError> {
        self.output.write_char(value)?;
        self.column += 1;
        Ok(())
    }

    fn write_str(&mut self, value: &str) -> Result<(), EmitError> {
        self.output.write_str(value)?;
        self.column += value.chars().count();
        Ok(())
    }

    fn write_break(&mut self) -> Result<(), EmitError> {
        self.output.write_char('\n')?;
        self.column = 0;
        self.line += 1;
        Ok(())
    }

    fn write_indicator(
        &mut self,
        indicator: &str,
        need_whitespace: bool,
        whitespace_after: bool,
        indentation_after: bool,
    ) -> Result<(), EmitError> {
        if need_whitespace && !self.whitespace {
            self.write_char(' ')?;
        }
        self.write_str(indicator)?;
        self.whitespace = whitespace_after;
        self.indentation = self.indentation && indentation_after;
        Ok(())
    }

    fn write_indent(&mut self) -> Result<(), EmitError> {
        let indent = self.indent.unwrap_or(0);
        if !self.indentation
            || self.column > indent
            || (self.column == indent && !self.whitespace)
        {
            self.write_break()?;
        }
        while self.column < indent {
            self.write_char(' ')?;
        }
        self.whitespace = true;
        self.indentation = true;
        Ok(())
    }

    fn write_anchor(&mut self, value: &str) -> Result<(), EmitError> {
        self.write_str(value)?;
        self.whitespace = false;
        self.indentation = false;
        Ok(())
    }

    fn write_tag_handle(&mut self, value: &str) -> Result<(), EmitError> {
        if !self.whitespace {
            self.write_char(' ')?;
        }
        self.write_str(value)?;
        self.whitespace = false;
        self.indentation = false;
        Ok(())
    }

    fn write_tag_content(&mut self, value: &str, need_whitespace: bool) -> Result<(), EmitError> {
        if need_whitespace && !self.whitespace {
            self.write_char(' ')?;
        }
        let encoded = url_encode(value);
        self.write_str(&encoded)?;
        self.whitespace = false;
        self.indentation = false;
        Ok(())
    }

    /*
     * Indent and state stacks.
     */

    fn increase_indent(&mut self, flow: bool, indentless: bool) {
        self.indents.push(self.indent);
        match self.indent {
            None => {
                self.indent = Some(if flow { self.best_indent } else { 0 });
            }
            Some(current) if !indentless => {
                self.indent = Some(current + self.best_indent);
            }
            _ => {}
        }
    }

    fn pop_indent(&mut self) -> Result<(), EmitError> {
        self.indent = self
            .indents
            .pop()
            .ok_or(EmitError::ProtocolViolation {
                expected: "a matching indent for the nested node",
            })?;
        Ok(())
    }

    fn pop_state(&mut self) -> Result<(), EmitError> {
        self.state = self
            .states
            .pop()
            .ok_or(EmitError::ProtocolViolation {
                expected: "a return state for the nested node",
            })?;
        Ok(())
    }
}

struct EmitMachine<'e, 'a> {
    emitter: &'e mut Emitter<'a>,
}

impl<'e, 'a> EmitMachine<'e, 'a> {
    fn run_step(&mut self) -> Result<bool, EmitError> {
        if self.emitter.need_more_events() {
            return Ok(true);
        }
        let Some(event) = self.emitter.events.pop_front() else {
            return Ok(true);
        };
        let analysis = self.emitter.analyze(&event);
        self.emitter.state_machine(event, analysis)?;
        Ok(false)
    }

    fn step(mut self) -> Next<Self, Result<(), EmitError>> {
        match self.run_step() {
            Ok(true) => Next::Finish(Ok(())),
            Ok(false) => Next::Recurse(self),
            Err(err) => Next::Finish(Err(err)),
        }
    }
}

fn default_tag_directives() -> [TagDirective; 2] {
    [
        TagDirective {
            handle: "!".to_string(),
            prefix: "!".to_string(),
        },
        TagDirective {
            handle: "!!".to_string(),
            prefix: "tag:yaml.org,2002:".to_string(),
        },
    ]
}

fn is_break(ch: char) -> bool {
    matches!(ch, '\r' | '\n' | '\u{85}' | '\u{2028}' | '\u{2029}')
}

fn is_blank_or_break(ch: char) -> bool {
    ch == ' ' || ch == '\t' || is_break(ch)
}

fn is_printable(ch: char) -> bool {
    matches!(ch,
        '\t' | '\n' | '\r' | '\u{85}'
        | '\u{20}'..='\u{7e}'
        | '\u{a0}'..='\u{d7ff}'
        | '\u{e000}'..='\u{fffd}'
        | '\u{10000}'..='\u{10ffff}')
}

// Classify every character once, left to right, and derive the legality
// flags for each scalar style from the observed space/break runs and
// indicator positions.
fn analyze_scalar(value: &str, unicode: bool) -> ScalarFacts {
    if value.is_empty() {
        return ScalarFacts::default();
    }

    let mut block_indicators = false;
    let mut flow_indicators = false;
    let mut line_breaks = false;
    let mut special_characters = false;

    let mut leading_spaces = false;
    let mut leading_breaks = false;
    let mut trailing_spaces = false;
    let mut trailing_breaks = false;
    let mut inline_breaks_spaces = false;
    let mut mixed_breaks_spaces = false;

    if value.starts_with("---") || value.starts_with("...") {
        block_indicators = true;
        flow_indicators = true;
    }

    let chars: Vec<char> = value.chars().collect();
    let mut preceded_by_space = true;
    let mut spaces = false;
    let mut breaks = false;
    let mut mixed = false;
    let mut leading = false;

    for (i, &ch) in chars.iter().enumerate() {
        let followed_by_space = chars.get(i + 1).map_or(true, |&next| is_blank_or_break(next));

        if i == 0 {
            if matches!(
                ch,
                '#' | ',' | '[' | ']' | '{' | '}' | '&' | '*' | '!' | '|' | '>' | '\\' | '"'
                    | '%' | '@' | '`'
            ) {
                flow_indicators = true;
                block_indicators = true;
            }
            if matches!(ch, '?' | ':') {
                flow_indicators = true;
                if followed_by_space {
                    block_indicators = true;
                }
            }
            if ch == '-' && followed_by_space {
                flow_indicators = true;
                block_indicators = true;
            }
        } else {
            if matches!(ch, ',' | '?' | '[' | ']' | '{' | '}') {
                flow_indicators = true;
            }
            if ch == ':' {
                flow_indicators = true;
                if followed_by_space {
                    block_indicators = true;
                }
            }
            if ch == '#' && preceded_by_space {
                flow_indicators = true;
                block_indicators = true;
            }
        }

        if !is_printable(ch) || (!ch.is_ascii() && !unicode) {
            special_characters = true;
        }
        if is_break(ch) {
            line_breaks = true;
        }

        if ch == ' ' {
            spaces = true;
            if i == 0 {
                leading = true;
            }
        } else if is_break(ch) {
            if spaces {
                mixed = true;
            }
            breaks = true;
            if i == 0 {
                leading = true;
            }
        } else if spaces || breaks {
            if leading {
                if spaces && breaks {
                    mixed_breaks_spaces = true;
                } else if spaces {
                    leading_spaces = true;
                } else {
                    leading_breaks = true;
                }
            } else if mixed || (spaces && breaks) {
                if mixed {
                    mixed_breaks_spaces = true;
                } else {
                    inline_breaks_spaces = true;
                }
            }
            spaces = false;
            breaks = false;
            mixed = false;
            leading = false;
        }

        if (spaces || breaks) && i == chars.len() - 1 {
            if spaces && breaks {
                mixed_breaks_spaces = true;
            } else if spaces {
                if leading {
                    leading_spaces = true;
                }
                trailing_spaces = true;
            } else {
                if leading {
                    leading_breaks = true;
                }
                trailing_breaks = true;
            }
        }

        preceded_by_space = is_blank_or_break(ch);
    }

    let mut facts = ScalarFacts {
        multiline: line_breaks,
        flow_plain_allowed: true,
        block_plain_allowed: true,
        single_quoted_allowed: true,
        block_allowed: true,
    };
    if leading_spaces || leading_breaks || trailing_spaces {
        facts.flow_plain_allowed = false;
        facts.block_plain_allowed = false;
        facts.block_allowed = false;
    }
    if trailing_breaks {
        facts.flow_plain_allowed = false;
        facts.block_plain_allowed = false;
    }
    if inline_breaks_spaces {
        facts.flow_plain_allowed = false;
        facts.block_plain_allowed = false;
        facts.single_quoted_allowed = false;
    }
    if mixed_breaks_spaces || special_characters {
        facts.flow_plain_allowed = false;
        facts.block_plain_allowed = false;
        facts.single_quoted_allowed = false;
        facts.block_allowed = false;
    }
    if line_breaks {
        facts.flow_plain_allowed = false;
        facts.block_plain_allowed = false;
    }
    if flow_indicators {
        facts.flow_plain_allowed = false;
    }
    if block_indicators {
        facts.block_plain_allowed = false;
    }
    facts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chomping {
    Strip,
    Clip,
    Keep,
}

fn determine_chomping(value: &str) -> Chomping {
    let mut tail = value.chars().rev();
    match tail.next() {
        Some(last) if is_break(last) => match tail.next() {
            Some(prev) if is_break(prev) => Chomping::Keep,
            _ => Chomping::Clip,
        },
        _ => Chomping::Strip,
    }
}

fn is_uri_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            '_' | '-' | ';' | '?' | '@' | '=' | '$' | '~' | '\\' | ')' | ']' | '/' | ':' | '&'
                | '+' | ',' | '.' | '*' | '(' | '['
        )
}

fn url_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if is_uri_char(ch) {
            out.push(ch);
        } else {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).as_bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(value: &str) -> Event {
        Event::Scalar {
            anchor: None,
            tag: None,
            value: value.to_string(),
            style: ScalarStyle::Any,
            plain_implicit: true,
            quoted_implicit: true,
        }
    }

    fn styled_scalar(value: &str, style: ScalarStyle) -> Event {
        Event::Scalar {
            anchor: None,
            tag: None,
            value: value.to_string(),
            style,
            plain_implicit: true,
            quoted_implicit: true,
        }
    }

    fn tagged_scalar(value: &str, tag: &str) -> Event {
        Event::Scalar {
            anchor: None,
            tag: Some(tag.to_string()),
            value: value.to_string(),
            style: ScalarStyle::Any,
            plain_implicit: false,
            quoted_implicit: false,
        }
    }

    fn document_start() -> Event {
        Event::DocumentStart {
            version: None,
            tags: Vec::new(),
            implicit: true,
        }
    }

    fn document_end() -> Event {
        Event::DocumentEnd { implicit: true }
    }

    fn doc(content: Vec<Event>) -> Vec<Event> {
        let mut events = vec![Event::StreamStart, document_start()];
        events.extend(content);
        events.push(document_end());
        events.push(Event::StreamEnd);
        events
    }

    fn emit_all(events: Vec<Event>) -> Result<String, EmitError> {
        let mut out = String::new();
        let mut emitter = Emitter::new(&mut out);
        for event in events {
            emitter.emit(event)?;
        }
        drop(emitter);
        Ok(out)
    }

    fn emit_all_with(events: Vec<Event>, options: EmitterOptions) -> Result<String, EmitError> {
        let mut out = String::new();
        let mut emitter = Emitter::with_options(&mut out, options);
        for event in events {
            emitter.emit(event)?;
        }
        drop(emitter);
        Ok(out)
    }

    #[test]
    fn emits_plain_scalar_document() {
        let out = emit_all(doc(vec![scalar("hello world")])).expect("emit should succeed");
        assert_eq!(out, "hello world\n");
    }

    #[test]
    fn multiline_value_forces_double_quotes() {
        let out = emit_all(doc(vec![styled_scalar("line1\nline2", ScalarStyle::Plain)]))
            .expect("emit should succeed");
        assert_eq!(out, "\"line1\\nline2\"\n");
    }

    #[test]
    fn empty_scalar_document_forces_marker() {
        let out = emit_all(doc(vec![scalar("")])).expect("emit should succeed");
        assert_eq!(out, "--- \n");
    }

    #[test]
    fn leading_or_trailing_space_is_never_plain() {
        let out = emit_all(doc(vec![scalar(" x")])).expect("emit should succeed");
        assert_eq!(out, "' x'\n");
        let out = emit_all(doc(vec![scalar("x ")])).expect("emit should succeed");
        assert_eq!(out, "'x '\n");
    }

    #[test]
    fn illegal_single_quoted_upgrades_to_double() {
        let out = emit_all(doc(vec![styled_scalar("a\u{1}b", ScalarStyle::SingleQuoted)]))
            .expect("emit should succeed");
        assert_eq!(out, "\"a\\x01b\"\n");
    }

    #[test]
    fn named_escapes_are_preferred() {
        let out = emit_all(doc(vec![styled_scalar(
            "bell\u{7} escape\u{1b}",
            ScalarStyle::DoubleQuoted,
        )]))
        .expect("emit should succeed");
        assert_eq!(out, "\"bell\\a escape\\e\"\n");
    }

    #[test]
    fn non_ascii_is_escaped_on_ascii_sink() {
        let out = emit_all_with(
            doc(vec![scalar("h\u{e9}llo")]),
            EmitterOptions {
                unicode: false,
                ..EmitterOptions::default()
            },
        )
        .expect("emit should succeed");
        assert_eq!(out, "\"h\\xE9llo\"\n");
    }

    #[test]
    fn block_sequence_layout() {
        let out = emit_all(doc(vec![
            Event::SequenceStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Block,
            },
            scalar("a"),
            scalar("b"),
            Event::SequenceEnd,
        ]))
        .expect("emit should succeed");
        assert_eq!(out, "- a\n- b\n");
    }

    #[test]
    fn flow_sequence_layout() {
        let out = emit_all(doc(vec![
            Event::SequenceStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Flow,
            },
            scalar("a"),
            scalar("b"),
            Event::SequenceEnd,
        ]))
        .expect("emit should succeed");
        assert_eq!(out, "['a', 'b']\n");
    }

    #[test]
    fn block_mapping_layout() {
        let out = emit_all(doc(vec![
            Event::MappingStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Block,
            },
            scalar("k"),
            scalar("v"),
            Event::MappingEnd,
        ]))
        .expect("emit should succeed");
        assert_eq!(out, "'k': v\n");
    }

    #[test]
    fn flow_mapping_layout() {
        let out = emit_all(doc(vec![
            Event::MappingStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Flow,
            },
            scalar("k"),
            scalar("v"),
            Event::MappingEnd,
        ]))
        .expect("emit should succeed");
        assert_eq!(out, "{'k': 'v'}\n");
    }

    #[test]
    fn nested_block_mapping_indents() {
        let out = emit_all(doc(vec![
            Event::MappingStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Block,
            },
            scalar("outer"),
            Event::MappingStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Block,
            },
            scalar("inner"),
            scalar("v"),
            Event::MappingEnd,
            Event::MappingEnd,
        ]))
        .expect("emit should succeed");
        assert_eq!(out, "'outer':\n  'inner': v\n");
    }

    #[test]
    fn sequence_under_mapping_key_is_indentless() {
        let out = emit_all(doc(vec![
            Event::MappingStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Block,
            },
            scalar("items"),
            Event::SequenceStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Block,
            },
            scalar("x"),
            scalar("y"),
            Event::SequenceEnd,
            Event::MappingEnd,
        ]))
        .expect("emit should succeed");
        assert_eq!(out, "'items':\n- x\n- y\n");
    }

    #[test]
    fn block_request_inside_flow_is_overridden() {
        let out = emit_all(doc(vec![
            Event::SequenceStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Flow,
            },
            Event::SequenceStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Block,
            },
            scalar("x"),
            Event::SequenceEnd,
            Event::SequenceEnd,
        ]))
        .expect("emit should succeed");
        assert_eq!(out, "[['x']]\n");
    }

    #[test]
    fn empty_block_mapping_collapses_to_flow() {
        let out = emit_all(doc(vec![
            Event::MappingStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Block,
            },
            Event::MappingEnd,
        ]))
        .expect("emit should succeed");
        assert_eq!(out, "{}\n");
    }

    #[test]
    fn empty_block_sequence_collapses_to_flow() {
        let out = emit_all(doc(vec![
            Event::SequenceStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Block,
            },
            Event::SequenceEnd,
        ]))
        .expect("emit should succeed");
        assert_eq!(out, "[]\n");
    }

    #[test]
    fn empty_collection_resolves_without_extra_lookahead() {
        let mut out = String::new();
        {
            let mut emitter = Emitter::new(&mut out);
            emitter.emit(Event::StreamStart).expect("stream start");
            emitter.emit(document_start()).expect("document start");
            emitter
                .emit(Event::MappingStart {
                    anchor: None,
                    tag: None,
                    style: CollectionStyle::Block,
                })
                .expect("mapping start");
            emitter.emit(Event::MappingEnd).expect("mapping end");
        }
        assert_eq!(out, "{}");
    }

    #[test]
    fn document_lookahead_resolves_on_matching_end() {
        let mut out = String::new();
        let mut emitter = Emitter::new(&mut out);
        emitter.emit(Event::StreamStart).expect("stream start");
        emitter.emit(document_start()).expect("buffered");
        // The matching end releases the document start with no third event;
        // the contentless document then trips the node dispatcher.
        let err = emitter.emit(document_end()).unwrap_err();
        assert!(matches!(err, EmitError::ProtocolViolation { .. }));
    }

    #[test]
    fn anchors_and_aliases_render() {
        let out = emit_all(doc(vec![
            Event::SequenceStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Block,
            },
            Event::Scalar {
                anchor: Some("A".to_string()),
                tag: None,
                value: "x".to_string(),
                style: ScalarStyle::Any,
                plain_implicit: true,
                quoted_implicit: true,
            },
            Event::Alias {
                anchor: "A".to_string(),
            },
            Event::SequenceEnd,
        ]))
        .expect("emit should succeed");
        assert_eq!(out, "- &A x\n- *A\n");
    }

    #[test]
    fn alias_without_anchor_is_malformed() {
        let err = emit_all(doc(vec![Event::Alias {
            anchor: String::new(),
        }]))
        .unwrap_err();
        assert!(matches!(err, EmitError::MalformedAlias));
    }

    #[test]
    fn untagged_nonimplicit_scalar_is_ambiguous() {
        let err = emit_all(doc(vec![Event::Scalar {
            anchor: None,
            tag: None,
            value: "x".to_string(),
            style: ScalarStyle::Any,
            plain_implicit: false,
            quoted_implicit: false,
        }]))
        .unwrap_err();
        assert!(matches!(err, EmitError::AmbiguousScalar));
    }

    #[test]
    fn stream_must_open_with_stream_start() {
        let err = emit_all(vec![scalar("x")]).unwrap_err();
        assert!(matches!(err, EmitError::ProtocolViolation { .. }));
    }

    #[test]
    fn nothing_accepted_after_stream_end() {
        let mut out = String::new();
        let mut emitter = Emitter::new(&mut out);
        emitter.emit(Event::StreamStart).expect("stream start");
        emitter.emit(Event::StreamEnd).expect("stream end");
        let err = emitter.emit(Event::StreamStart).unwrap_err();
        assert!(matches!(err, EmitError::ProtocolViolation { .. }));
    }

    #[test]
    fn duplicate_directive_handle_fails_before_output() {
        let mut out = String::new();
        {
            let mut emitter = Emitter::new(&mut out);
            emitter.emit(Event::StreamStart).expect("stream start");
            emitter
                .emit(Event::DocumentStart {
                    version: None,
                    tags: vec![
                        TagDirective {
                            handle: "!e!".to_string(),
                            prefix: "tag:a".to_string(),
                        },
                        TagDirective {
                            handle: "!e!".to_string(),
                            prefix: "tag:b".to_string(),
                        },
                    ],
                    implicit: true,
                })
                .expect("buffered");
            let err = emitter.emit(scalar("x")).unwrap_err();
            assert!(matches!(err, EmitError::DuplicateDirective { .. }));
        }
        assert!(out.is_empty());
    }

    #[test]
    fn identical_duplicate_directive_is_ignored() {
        let directive = TagDirective {
            handle: "!e!".to_string(),
            prefix: "tag:example.com,2000:app/".to_string(),
        };
        let out = emit_all(vec![
            Event::StreamStart,
            Event::DocumentStart {
                version: None,
                tags: vec![directive.clone(), directive],
                implicit: true,
            },
            scalar("x"),
            document_end(),
            Event::StreamEnd,
        ])
        .expect("emit should succeed");
        assert_eq!(out.matches("%TAG").count(), 1);
        assert_eq!(out, "%TAG !e! tag:example.com,2000:app/\n--- x\n");
    }

    #[test]
    fn incompatible_version_directive_fails_before_output() {
        let mut out = String::new();
        {
            let mut emitter = Emitter::new(&mut out);
            emitter.emit(Event::StreamStart).expect("stream start");
            emitter
                .emit(Event::DocumentStart {
                    version: Some(VersionDirective { major: 2, minor: 0 }),
                    tags: Vec::new(),
                    implicit: true,
                })
                .expect("buffered");
            let err = emitter.emit(scalar("x")).unwrap_err();
            assert!(matches!(err, EmitError::IncompatibleVersion { major: 2, minor: 0 }));
        }
        assert!(out.is_empty());
    }

    #[test]
    fn tag_directive_shorthand_rendering() {
        let out = emit_all(vec![
            Event::StreamStart,
            Event::DocumentStart {
                version: None,
                tags: vec![TagDirective {
                    handle: "!e!".to_string(),
                    prefix: "tag:example.com,2000:app/".to_string(),
                }],
                implicit: true,
            },
            tagged_scalar("x", "tag:example.com,2000:app/foo"),
            document_end(),
            Event::StreamEnd,
        ])
        .expect("emit should succeed");
        assert_eq!(out, "%TAG !e! tag:example.com,2000:app/\n--- !e!foo x\n");
    }

    #[test]
    fn unmatched_tag_renders_verbatim() {
        let out = emit_all(doc(vec![tagged_scalar("v", "x-private:foo")]))
            .expect("emit should succeed");
        assert_eq!(out, "!<x-private:foo> v\n");
    }

    #[test]
    fn directives_reset_between_documents() {
        let out = emit_all(vec![
            Event::StreamStart,
            Event::DocumentStart {
                version: None,
                tags: vec![TagDirective {
                    handle: "!e!".to_string(),
                    prefix: "tag:example.com,2000:app/".to_string(),
                }],
                implicit: true,
            },
            tagged_scalar("x", "tag:example.com,2000:app/foo"),
            document_end(),
            document_start(),
            tagged_scalar("x", "tag:example.com,2000:app/foo"),
            document_end(),
            Event::StreamEnd,
        ])
        .expect("emit should succeed");
        assert_eq!(
            out,
            "%TAG !e! tag:example.com,2000:app/\n--- !e!foo x\n--- !<tag:example.com,2000:app/foo> x\n"
        );
    }

    #[test]
    fn second_document_gets_explicit_marker() {
        let out = emit_all(vec![
            Event::StreamStart,
            document_start(),
            scalar("a"),
            document_end(),
            document_start(),
            scalar("b"),
            document_end(),
            Event::StreamEnd,
        ])
        .expect("emit should succeed");
        assert_eq!(out, "a\n--- b\n");
    }

    #[test]
    fn explicit_document_end_renders_dots() {
        let out = emit_all(vec![
            Event::StreamStart,
            document_start(),
            scalar("a"),
            Event::DocumentEnd { implicit: false },
            Event::StreamEnd,
        ])
        .expect("emit should succeed");
        assert_eq!(out, "a\n...\n");
    }

    #[test]
    fn literal_chomping_follows_trailing_breaks() {
        let out = emit_all(doc(vec![styled_scalar("a", ScalarStyle::Literal)]))
            .expect("emit should succeed");
        assert_eq!(out, "|-\n  a\n");
        let out = emit_all(doc(vec![styled_scalar("a\n", ScalarStyle::Literal)]))
            .expect("emit should succeed");
        assert_eq!(out, "|\n  a\n");
        let out = emit_all(doc(vec![styled_scalar("a\n\n", ScalarStyle::Literal)]))
            .expect("emit should succeed");
        assert_eq!(out, "|+\n  a\n\n");
    }

    #[test]
    fn folded_scalar_protects_internal_break() {
        let out = emit_all(doc(vec![styled_scalar("fold me\nnext\n", ScalarStyle::Folded)]))
            .expect("emit should succeed");
        assert_eq!(out, ">\n  fold me\n\n  next\n");
    }

    #[test]
    fn literal_in_flow_context_downgrades_to_double() {
        let out = emit_all(doc(vec![
            Event::SequenceStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Flow,
            },
            styled_scalar("x\ny", ScalarStyle::Literal),
            Event::SequenceEnd,
        ]))
        .expect("emit should succeed");
        assert_eq!(out, "[\"x\\ny\"]\n");
    }

    #[test]
    fn plain_scalar_wraps_at_preferred_width() {
        let out = emit_all_with(
            doc(vec![scalar("aaaa bbbb cccc")]),
            EmitterOptions {
                best_width: 5,
                ..EmitterOptions::default()
            },
        )
        .expect("emit should succeed");
        assert_eq!(out, "aaaa bbbb\n  cccc\n");
    }

    #[test]
    fn canonical_mode_forces_marker_and_double_quotes() {
        let out = emit_all_with(
            doc(vec![scalar("x")]),
            EmitterOptions {
                canonical: true,
                ..EmitterOptions::default()
            },
        )
        .expect("emit should succeed");
        assert_eq!(out, "---\n\"x\"\n");
    }

    #[test]
    fn out_of_range_options_are_clamped() {
        let out = emit_all_with(
            doc(vec![scalar("hello world")]),
            EmitterOptions {
                best_indent: 40,
                best_width: 1,
                ..EmitterOptions::default()
            },
        )
        .expect("emit should succeed");
        assert_eq!(out, "hello world\n");
    }

    #[test]
    fn long_key_falls_back_to_explicit_form() {
        let key = "k".repeat(200);
        let out = emit_all(doc(vec![
            Event::MappingStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Block,
            },
            scalar(&key),
            scalar("v"),
            Event::MappingEnd,
        ]))
        .expect("emit should succeed");
        assert_eq!(out, format!("? {key}\n: v\n"));
    }

    #[test]
    fn key_at_length_limit_stays_compact() {
        let key = "k".repeat(128);
        let out = emit_all(doc(vec![
            Event::MappingStart {
                anchor: None,
                tag: None,
                style: CollectionStyle::Block,
            },
            scalar(&key),
            scalar("v"),
            Event::MappingEnd,
        ]))
        .expect("emit should succeed");
        assert_eq!(out, format!("'{key}': v\n"));
    }

    #[test]
    fn emitted_scalars_survive_reanalysis() {
        // A value rendered plain must come back out of the analyzer still
        // plain-legal, or the emitted form would re-parse differently.
        for value in ["hello world", "plain", "v1.2.3", "x#y", "-x"] {
            let out = emit_all(doc(vec![scalar(value)])).expect("emit should succeed");
            let body = out.trim_end_matches('\n');
            assert_eq!(body, value);
            let facts = analyze_scalar(body, true);
            assert!(facts.block_plain_allowed, "{value:?} re-analyzed as non-plain");
        }

        // Values that cannot stay plain keep their content inside quotes.
        let out = emit_all(doc(vec![scalar("a: b")])).expect("emit should succeed");
        assert_eq!(out, "'a: b'\n");
        let out = emit_all(doc(vec![scalar(" x")])).expect("emit should succeed");
        assert_eq!(out, "' x'\n");
        let out = emit_all(doc(vec![scalar("line1\nline2")])).expect("emit should succeed");
        assert_eq!(out, "\"line1\\nline2\"\n");
    }

    #[test]
    fn analyzer_flags_indicator_positions() {
        let facts = analyze_scalar("hello world", true);
        assert!(facts.flow_plain_allowed && facts.block_plain_allowed);
        assert!(!facts.multiline);

        // Leading dash only matters when followed by whitespace.
        let facts = analyze_scalar("-x", true);
        assert!(facts.block_plain_allowed);
        let facts = analyze_scalar("- x", true);
        assert!(!facts.flow_plain_allowed && !facts.block_plain_allowed);

        // Interior colon is always a flow problem, a block problem only
        // when followed by whitespace.
        let facts = analyze_scalar("a:b", true);
        assert!(!facts.flow_plain_allowed && facts.block_plain_allowed);
        let facts = analyze_scalar("a: b", true);
        assert!(!facts.flow_plain_allowed && !facts.block_plain_allowed);

        // A hash counts only after whitespace.
        let facts = analyze_scalar("x#y", true);
        assert!(facts.block_plain_allowed);
        let facts = analyze_scalar("x #y", true);
        assert!(!facts.flow_plain_allowed && !facts.block_plain_allowed);

        let facts = analyze_scalar("---", true);
        assert!(!facts.flow_plain_allowed && !facts.block_plain_allowed);
    }

    #[test]
    fn analyzer_flags_space_and_break_runs() {
        let facts = analyze_scalar(" x", true);
        assert!(!facts.flow_plain_allowed && !facts.block_plain_allowed);
        assert!(!facts.block_allowed);
        assert!(facts.single_quoted_allowed);

        let facts = analyze_scalar("x ", true);
        assert!(!facts.block_plain_allowed && !facts.block_allowed);

        let facts = analyze_scalar("a\nb", true);
        assert!(facts.multiline);
        assert!(!facts.flow_plain_allowed && !facts.block_plain_allowed);
        assert!(facts.single_quoted_allowed && facts.block_allowed);

        // Non-printable characters leave only the double-quoted style.
        let facts = analyze_scalar("x\u{1}", true);
        assert!(!facts.single_quoted_allowed && !facts.block_allowed);

        let facts = analyze_scalar("", true);
        assert!(facts.block_plain_allowed && facts.single_quoted_allowed);
        assert!(!facts.block_allowed);
    }

    #[test]
    fn chomping_counts_trailing_breaks() {
        assert_eq!(determine_chomping(""), Chomping::Strip);
        assert_eq!(determine_chomping("a"), Chomping::Strip);
        assert_eq!(determine_chomping("a\n"), Chomping::Clip);
        assert_eq!(determine_chomping("\n"), Chomping::Clip);
        assert_eq!(determine_chomping("a\n\n"), Chomping::Keep);
    }

    #[test]
    fn tag_content_is_percent_encoded() {
        assert_eq!(url_encode("tag:yaml.org,2002:str"), "tag:yaml.org,2002:str");
        assert_eq!(url_encode("a b"), "a%20b");
        assert_eq!(url_encode("caf\u{e9}"), "caf%C3%A9");
    }
}
