//! Textual pipeline descriptions.
//!
//! An input line is `source|modifier...|format` and an output line is
//! `format|modifier...|sink`. Every token must be registered; the parser
//! checks all of them before constructing anything, so an error never
//! leaves half-built components behind.

use tracing::debug;

use super::{ComponentKind, Flow, FlowConfig, Input, Output, Registry};
use crate::error::{PipelineError, Result};

/// Token separator.
pub const SEPARATOR: char = '|';

/// Builds inputs, outputs and flows from descriptions.
pub struct Parser<'a> {
    registry: &'a Registry,
}

struct Line<'l> {
    first: &'l str,
    middle: Vec<&'l str>,
    last: &'l str,
}

impl<'a> Parser<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    pub fn parse_input(&self, line: &str) -> Result<Input> {
        let tokens = split(line)?;
        self.check(&tokens, ComponentKind::Source, ComponentKind::InputModifier, ComponentKind::InputFormat)?;

        let source = self.registry.source(tokens.first)?;
        let modifiers = tokens
            .middle
            .iter()
            .map(|name| Ok((name.to_string(), self.registry.input_modifier(name)?)))
            .collect::<Result<Vec<_>>>()?;
        let format = self.registry.input_format(tokens.last)?;

        debug!(line, modifiers = modifiers.len(), "parsed input");
        Ok(Input::new(line.trim(), source, modifiers, format))
    }

    pub fn parse_output(&self, line: &str) -> Result<Output> {
        let tokens = split(line)?;
        self.check(&tokens, ComponentKind::OutputFormat, ComponentKind::OutputModifier, ComponentKind::Sink)?;

        let format = self.registry.output_format(tokens.first)?;
        let modifiers = tokens
            .middle
            .iter()
            .map(|name| self.registry.output_modifier(name))
            .collect::<Result<Vec<_>>>()?;
        let sink = self.registry.sink(tokens.last)?;

        debug!(line, modifiers = modifiers.len(), "parsed output");
        Output::new(line.trim(), format, modifiers, sink)
    }

    /// Parse one input and every output into a flow.
    pub fn parse_flow<S: AsRef<str>>(&self, input: &str, outputs: &[S], config: FlowConfig) -> Result<Flow> {
        // Validate every line before any constructor runs
        let input_tokens = split(input)?;
        self.check(&input_tokens, ComponentKind::Source, ComponentKind::InputModifier, ComponentKind::InputFormat)?;
        for output in outputs {
            let tokens = split(output.as_ref())?;
            self.check(&tokens, ComponentKind::OutputFormat, ComponentKind::OutputModifier, ComponentKind::Sink)?;
        }
        if outputs.is_empty() {
            return Err(PipelineError::NoOutputs.into());
        }

        let input = self.parse_input(input)?;
        let outputs = outputs
            .iter()
            .map(|line| self.parse_output(line.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Flow::new(input, outputs, config)
    }

    fn check(&self, tokens: &Line<'_>, first: ComponentKind, middle: ComponentKind, last: ComponentKind) -> Result<()> {
        let positions = std::iter::once((first, tokens.first))
            .chain(tokens.middle.iter().map(|t| (middle, *t)))
            .chain(std::iter::once((last, tokens.last)));

        for (kind, token) in positions {
            if !self.registry.contains(kind, token) {
                return Err(PipelineError::UnknownComponent {
                    kind,
                    token: token.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

fn split(line: &str) -> Result<Line<'_>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::EmptyLine.into());
    }

    let tokens: Vec<&str> = trimmed.split(SEPARATOR).map(str::trim).collect();
    match tokens.as_slice() {
        [first, middle @ .., last] => Ok(Line {
            first: *first,
            middle: middle.to_vec(),
            last: *last,
        }),
        _ => Err(PipelineError::TooFewTokens {
            line: trimmed.to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CloseErrors, Error};
    use crate::message::Record;
    use crate::pipeline::{
        Closer, InputContext, InputFormat, InputModifier, OutputFormat, OutputModifier, SinkWriter, Source,
        StreamDecoder,
    };
    use crate::stream::StreamHandle;
    use async_trait::async_trait;
    use std::io::{self, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Stub;

    #[async_trait]
    impl Source for Stub {
        async fn run(&self, _cancel: CancellationToken, _streams: mpsc::Sender<StreamHandle>) -> Result<()> {
            Ok(())
        }
    }

    impl InputModifier for Stub {
        fn wrap(&self, stream: StreamHandle) -> Result<(StreamHandle, Option<Closer>)> {
            Ok((stream, None))
        }
    }

    impl InputFormat for Stub {
        fn start(&self, _ctx: &InputContext) -> Result<Arc<dyn StreamDecoder>> {
            Ok(Arc::new(Stub))
        }
    }

    impl StreamDecoder for Stub {
        fn decode(&self, _stream: StreamHandle) -> Result<()> {
            Ok(())
        }
    }

    impl OutputFormat for Stub {
        fn write_records(&mut self, _records: &mut mpsc::Receiver<Arc<Record>>, _out: &mut dyn Write) -> io::Result<()> {
            Ok(())
        }
    }

    impl OutputModifier for Stub {
        fn wrap(&self, inner: Box<dyn SinkWriter>) -> Result<Box<dyn SinkWriter>> {
            Ok(inner)
        }
    }

    impl Write for Stub {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            Ok(data.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SinkWriter for Stub {
        fn close(self: Box<Self>) -> std::result::Result<(), CloseErrors> {
            Ok(())
        }
    }

    fn registry(built: Arc<AtomicUsize>) -> Registry {
        let mut r = Registry::new();
        let count = move || {
            built.fetch_add(1, Ordering::SeqCst);
        };
        let c = count.clone();
        r.register_source("tcp", move || {
            c();
            Ok(Box::new(Stub))
        });
        r.register_input_modifier("gunzip", || Ok(Box::new(Stub)));
        r.register_input_format("http", || Ok(Box::new(Stub)));
        r.register_output_format("json", || Ok(Box::new(Stub)));
        r.register_output_modifier("gzip", || Ok(Box::new(Stub)));
        let c = count;
        r.register_sink("gcs", move || {
            c();
            Ok(Box::new(Stub))
        });
        r
    }

    fn unknown(err: Error) -> (ComponentKind, String) {
        match err {
            Error::Pipeline(PipelineError::UnknownComponent { kind, token }) => (kind, token),
            other => panic!("unexpected {other}"),
        }
    }

    // Test 1: Input line without modifiers
    #[test]
    fn test_parse_input() {
        let registry = registry(Arc::default());
        let input = Parser::new(&registry).parse_input("tcp|http").unwrap();
        assert_eq!(input.modifier_count(), 0);
        assert_eq!(input.line(), "tcp|http");

        let input = Parser::new(&registry).parse_input(" tcp | gunzip | http ").unwrap();
        assert_eq!(input.modifier_count(), 1);
    }

    // Test 2: Output line resolves format, one modifier and sink
    #[test]
    fn test_parse_output() {
        let counter = |built: &Arc<AtomicUsize>| {
            let built = built.clone();
            move || {
                built.fetch_add(1, Ordering::SeqCst);
            }
        };
        let [json, text, gzip, zstd, gcs, file] = std::array::from_fn(|_| Arc::new(AtomicUsize::new(0)));

        let mut r = Registry::new();
        let (c, d) = (counter(&json), counter(&text));
        r.register_output_format("json", move || {
            c();
            Ok(Box::new(Stub))
        });
        r.register_output_format("text", move || {
            d();
            Ok(Box::new(Stub))
        });
        let (c, d) = (counter(&gzip), counter(&zstd));
        r.register_output_modifier("gzip", move || {
            c();
            Ok(Box::new(Stub))
        });
        r.register_output_modifier("zstd", move || {
            d();
            Ok(Box::new(Stub))
        });
        let (c, d) = (counter(&gcs), counter(&file));
        r.register_sink("gcs", move || {
            c();
            Ok(Box::new(Stub))
        });
        r.register_sink("file", move || {
            d();
            Ok(Box::new(Stub))
        });

        let output = Parser::new(&r).parse_output("json|gzip|gcs").unwrap();
        assert_eq!(output.line(), "json|gzip|gcs");
        assert_eq!(output.modifier_count(), 1);
        let built: Vec<_> = [&json, &gzip, &gcs, &text, &zstd, &file]
            .iter()
            .map(|n| n.load(Ordering::SeqCst))
            .collect();
        assert_eq!(built, [1, 1, 1, 0, 0, 0]);

        let output = Parser::new(&r).parse_output("json|gcs").unwrap();
        assert_eq!(output.modifier_count(), 0);
    }

    // Test 3: Empty and single-token lines
    #[test]
    fn test_parse_line_shape_errors() {
        let registry = registry(Arc::default());
        let parser = Parser::new(&registry);

        assert!(matches!(
            parser.parse_input("").err().unwrap(),
            Error::Pipeline(PipelineError::EmptyLine)
        ));
        assert!(matches!(
            parser.parse_output("   ").err().unwrap(),
            Error::Pipeline(PipelineError::EmptyLine)
        ));
        assert!(matches!(
            parser.parse_input("tcp").err().unwrap(),
            Error::Pipeline(PipelineError::TooFewTokens { .. })
        ));
    }

    // Test 4: Unknown tokens name the token and its registry
    #[test]
    fn test_unknown_tokens() {
        let registry = registry(Arc::default());
        let parser = Parser::new(&registry);

        assert_eq!(
            unknown(parser.parse_input("udp|http").err().unwrap()),
            (ComponentKind::Source, "udp".to_string())
        );
        assert_eq!(
            unknown(parser.parse_input("tcp|bunzip|http").err().unwrap()),
            (ComponentKind::InputModifier, "bunzip".to_string())
        );
        assert_eq!(
            unknown(parser.parse_input("tcp|json").err().unwrap()),
            (ComponentKind::InputFormat, "json".to_string())
        );
        assert_eq!(
            unknown(parser.parse_output("json|gzip|s3").err().unwrap()),
            (ComponentKind::Sink, "s3".to_string())
        );
        // Source token in sink position
        assert_eq!(
            unknown(parser.parse_output("http|gcs").err().unwrap()),
            (ComponentKind::OutputFormat, "http".to_string())
        );
    }

    // Test 5: A bad line constructs nothing
    #[test]
    fn test_no_partial_construction() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = registry(built.clone());
        let parser = Parser::new(&registry);

        assert!(parser.parse_input("tcp|bogus|http").is_err());
        assert!(parser.parse_flow("tcp|http", &["json|gcs", "json|nope"], FlowConfig::default()).is_err());
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    // Test 6: Flow with several outputs
    #[test]
    fn test_parse_flow() {
        let registry = registry(Arc::default());
        let flow = Parser::new(&registry)
            .parse_flow("tcp|http", &["json|gcs", "json|gzip|gcs"], FlowConfig::default())
            .unwrap();
        assert_eq!(flow.input().line(), "tcp|http");
        let lines: Vec<_> = flow.outputs().map(|o| o.line().to_string()).collect();
        assert_eq!(lines, ["json|gcs", "json|gzip|gcs"]);

        let none: [&str; 0] = [];
        assert!(matches!(
            Parser::new(&registry).parse_flow("tcp|http", &none, FlowConfig::default()).err().unwrap(),
            Error::Pipeline(PipelineError::NoOutputs)
        ));
    }
}
