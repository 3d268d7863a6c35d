use ninja_file::ByteFragment;

use crate::ast::Target;
use crate::error::ParseError;
use crate::lexer::{Lexer, Token};
use crate::result::{ChildScheduler, IncludeKind, ParsePromise, ParseResult, PendingInclude};
use crate::scope::{ScopeArena, ScopeId};

/// Variables a rule body may bind. Anything else is a typo worth rejecting
/// early instead of surfacing as a silently-empty expansion at build time.
const ALLOWED_RULE_VARIABLES: &[&[u8]] = &[
    b"command",
    b"depfile",
    b"deps",
    b"description",
    b"generator",
    b"pool",
    b"restat",
    b"rspfile",
    b"rspfile_content",
];

/// Structural parser for one fragment of a ninja file.
///
/// A fragment always starts at a statement boundary, so the parser can run
/// on mid-file blocks independently. It records declarations without
/// evaluating anything: values stay as [`Expr`](crate::ast::Expr)s, `build`
/// statements are skipped over and kept as raw byte fragments, and
/// `include`/`subninja` paths become [`ParsePromise`]s (plain paths are
/// scheduled on the spot, paths with references wait for scope expansion).
struct Parser<'a, 'b> {
    fragment: &'a ByteFragment,
    lexer: Lexer<'a>,
    scheduler: &'b dyn ChildScheduler,
    lookahead: Option<(Token<'a>, usize)>,
}

/// Parses one fragment into `result`. Fails fast on the first malformed
/// statement.
pub fn parse_fragment(
    fragment: &ByteFragment,
    scheduler: &dyn ChildScheduler,
    result: &mut ParseResult,
) -> Result<(), ParseError> {
    Parser {
        fragment,
        lexer: Lexer::new(fragment.as_bytes(), fragment.start_offset()),
        scheduler,
        lookahead: None,
    }
    .parse(result)
}

impl<'a, 'b> Parser<'a, 'b> {
    fn next(&mut self) -> Result<Option<(Token<'a>, usize)>, ParseError> {
        match self.lookahead.take() {
            Some(t) => Ok(Some(t)),
            None => Ok(self.lexer.next_token()?),
        }
    }

    fn peek(&mut self) -> Result<Option<(Token<'a>, usize)>, ParseError> {
        if self.lookahead.is_none() {
            self.lookahead = self.lexer.next_token()?;
        }
        Ok(self.lookahead)
    }

    fn expect_identifier(&mut self, what: &str) -> Result<(Vec<u8>, usize), ParseError> {
        match self.next()? {
            Some((token, off)) if token.is_identifier() => Ok((token.value().to_vec(), off)),
            Some((token, off)) => Err(ParseError::new(
                off,
                format!("expected {}, got {}", what, token),
            )),
            None => Err(ParseError::new(
                self.lexer.offset(),
                format!("expected {}, got end of input", what),
            )),
        }
    }

    fn expect_equals(&mut self) -> Result<(), ParseError> {
        match self.next()? {
            Some((Token::Equals, _)) => Ok(()),
            Some((token, off)) => Err(ParseError::new(off, format!("expected '=', got {}", token))),
            None => Err(ParseError::new(
                self.lexer.offset(),
                "expected '=', got end of input",
            )),
        }
    }

    // End of line or end of fragment both terminate a statement.
    fn expect_newline(&mut self) -> Result<(), ParseError> {
        match self.next()? {
            None | Some((Token::Newline, _)) => Ok(()),
            Some((token, off)) => Err(ParseError::new(
                off,
                format!("expected end of line, got {}", token),
            )),
        }
    }

    fn parse(mut self, result: &mut ParseResult) -> Result<(), ParseError> {
        while let Some((token, off)) = self.next()? {
            match token {
                Token::Newline => continue,
                Token::Identifier(name) => {
                    self.expect_equals()?;
                    let value = self.lexer.read_value()?;
                    self.expect_newline()?;
                    result.variables.push((off, name.to_vec(), value));
                }
                Token::Rule => self.rule(off, result)?,
                Token::Pool => self.pool(off, result)?,
                Token::Build => {
                    // Deferred to the target pass; just find the extent.
                    debug_assert!(self.lookahead.is_none());
                    let end = self.lexer.skip_build_statement();
                    result.targets.push(self.fragment.slice_abs(off..end));
                }
                Token::Default => self.defaults(off, result)?,
                Token::Include => self.include(IncludeKind::Include, off, result)?,
                Token::Subninja => self.include(IncludeKind::Subninja, off, result)?,
                Token::Indent => {
                    return Err(ParseError::new(
                        off,
                        "unexpected indent outside a rule, pool or build statement",
                    ));
                }
                other => {
                    return Err(ParseError::new(off, format!("unexpected {}", other)));
                }
            }
        }
        Ok(())
    }

    // Indented `name = value` lines following a rule or pool header.
    fn indented_bindings(&mut self) -> Result<Vec<(usize, Vec<u8>, crate::ast::Expr)>, ParseError> {
        let mut bindings = Vec::new();
        while let Some((Token::Indent, _)) = self.peek()? {
            self.next()?;
            let (name, off) = self.expect_identifier("a variable name")?;
            self.expect_equals()?;
            let value = self.lexer.read_value()?;
            self.expect_newline()?;
            bindings.push((off, name, value));
        }
        Ok(bindings)
    }

    fn rule(&mut self, offset: usize, result: &mut ParseResult) -> Result<(), ParseError> {
        let (name, _) = self.expect_identifier("a rule name")?;
        self.expect_newline()?;
        let mut rule = crate::ast::Rule {
            name,
            bindings: Default::default(),
        };
        for (off, var, value) in self.indented_bindings()? {
            if !ALLOWED_RULE_VARIABLES.contains(&&var[..]) {
                return Err(ParseError::new(
                    off,
                    format!(
                        "unexpected variable '{}' in rule '{}'",
                        String::from_utf8_lossy(&var),
                        String::from_utf8_lossy(&rule.name)
                    ),
                ));
            }
            if rule.bindings.insert(var.clone(), value).is_some() {
                return Err(ParseError::new(
                    off,
                    format!("duplicate variable '{}'", String::from_utf8_lossy(&var)),
                ));
            }
        }
        result.rules.push((offset, rule));
        Ok(())
    }

    fn pool(&mut self, offset: usize, result: &mut ParseResult) -> Result<(), ParseError> {
        let (name, _) = self.expect_identifier("a pool name")?;
        self.expect_newline()?;
        let mut depth = None;
        for (off, var, value) in self.indented_bindings()? {
            if var != b"depth" {
                return Err(ParseError::new(
                    off,
                    format!(
                        "unexpected variable '{}' in pool '{}'",
                        String::from_utf8_lossy(&var),
                        String::from_utf8_lossy(&name)
                    ),
                ));
            }
            if depth.replace(value).is_some() {
                return Err(ParseError::new(off, "duplicate 'depth'"));
            }
        }
        let depth = depth.ok_or_else(|| {
            ParseError::new(
                offset,
                format!("pool '{}' needs a 'depth'", String::from_utf8_lossy(&name)),
            )
        })?;
        result
            .pools
            .push((offset, crate::result::PoolDeclaration { name, depth }));
        Ok(())
    }

    fn defaults(&mut self, offset: usize, result: &mut ParseResult) -> Result<(), ParseError> {
        debug_assert!(self.lookahead.is_none());
        let mut paths = Vec::new();
        while let Some(path) = self.lexer.read_path()? {
            paths.push(path);
        }
        if paths.is_empty() {
            return Err(ParseError::new(
                offset,
                "expected at least one path after 'default'",
            ));
        }
        self.expect_newline()?;
        result.defaults.push((offset, paths));
        Ok(())
    }

    fn include(
        &mut self,
        kind: IncludeKind,
        offset: usize,
        result: &mut ParseResult,
    ) -> Result<(), ParseError> {
        debug_assert!(self.lookahead.is_none());
        let keyword = match kind {
            IncludeKind::Include => "include",
            IncludeKind::Subninja => "subninja",
        };
        let path = self.lexer.read_path()?.ok_or_else(|| {
            ParseError::new(offset, format!("expected a path after '{}'", keyword))
        })?;
        self.expect_newline()?;
        result.includes.push(PendingInclude {
            kind,
            offset,
            promise: ParsePromise::for_path(path, self.scheduler),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Read {
    Outputs,
    ImplicitOutputs,
    Inputs,
    ImplicitInputs,
    OrderInputs,
}

/// Parses one raw `build` fragment into a [`Target`], expanding every path
/// and binding against `scope` as of the statement's offset.
///
/// This runs after scope expansion is complete, so even variables defined
/// textually after the statement in a *different block* are settled; the
/// offset filter in the scope keeps lookup identical to a sequential read.
pub fn parse_target(
    fragment: &ByteFragment,
    arena: &ScopeArena,
    scope: ScopeId,
) -> Result<Target, ParseError> {
    let offset = fragment.start_offset();
    let mut lexer = Lexer::new(fragment.as_bytes(), offset);
    match lexer.next_token()? {
        Some((Token::Build, _)) => {}
        _ => return Err(ParseError::new(offset, "expected 'build'")),
    }

    let mut target = Target {
        outputs: Vec::new(),
        implicit_outputs: Vec::new(),
        rule: Vec::new(),
        inputs: Vec::new(),
        implicit_inputs: Vec::new(),
        order_inputs: Vec::new(),
        bindings: Vec::new(),
        scope,
        offset,
    };
    let mut read = Read::Outputs;
    let mut saw_rule = false;

    loop {
        while let Some(path) = lexer.read_path()? {
            let expanded = arena.expand(scope, &path, offset);
            if expanded.is_empty() {
                return Err(ParseError::new(
                    lexer.offset(),
                    "path expanded to an empty string",
                ));
            }
            let list = match read {
                Read::Outputs => &mut target.outputs,
                Read::ImplicitOutputs => &mut target.implicit_outputs,
                Read::Inputs => &mut target.inputs,
                Read::ImplicitInputs => &mut target.implicit_inputs,
                Read::OrderInputs => &mut target.order_inputs,
            };
            list.push(expanded);
        }
        match lexer.next_token()? {
            None => break,
            Some((Token::Newline, _)) => break,
            Some((Token::Pipe, off)) => {
                read = match read {
                    Read::Outputs => Read::ImplicitOutputs,
                    Read::Inputs => Read::ImplicitInputs,
                    _ => return Err(ParseError::new(off, "unexpected '|'")),
                };
            }
            Some((Token::Pipe2, off)) => {
                read = match read {
                    Read::Inputs | Read::ImplicitInputs => Read::OrderInputs,
                    _ => return Err(ParseError::new(off, "unexpected '||'")),
                };
            }
            Some((Token::Colon, off)) => {
                if !matches!(read, Read::Outputs | Read::ImplicitOutputs) {
                    return Err(ParseError::new(off, "unexpected ':'"));
                }
                match lexer.next_token()? {
                    Some((token, _)) if token.is_identifier() => {
                        target.rule = token.value().to_vec();
                        saw_rule = true;
                    }
                    Some((token, off)) => {
                        return Err(ParseError::new(
                            off,
                            format!("expected a rule name, got {}", token),
                        ));
                    }
                    None => {
                        return Err(ParseError::new(
                            lexer.offset(),
                            "expected a rule name, got end of input",
                        ));
                    }
                }
                read = Read::Inputs;
            }
            Some((token, off)) => {
                return Err(ParseError::new(off, format!("unexpected {}", token)));
            }
        }
    }

    if target.outputs.is_empty() {
        return Err(ParseError::new(offset, "expected at least one output"));
    }
    if !saw_rule {
        return Err(ParseError::new(offset, "expected ':' and a rule name"));
    }
    if target.rule != b"phony" && arena.lookup_rule(scope, &target.rule, offset).is_none() {
        return Err(ParseError::new(
            offset,
            format!("unknown rule '{}'", String::from_utf8_lossy(&target.rule)),
        ));
    }

    // Indented per-edge bindings.
    loop {
        match lexer.next_token()? {
            None => break,
            Some((Token::Newline, _)) => continue,
            Some((Token::Indent, _)) => {
                let (name, off) = match lexer.next_token()? {
                    Some((token, off)) if token.is_identifier() => {
                        (token.value().to_vec(), off)
                    }
                    Some((token, off)) => {
                        return Err(ParseError::new(
                            off,
                            format!("expected a variable name, got {}", token),
                        ));
                    }
                    None => break,
                };
                match lexer.next_token()? {
                    Some((Token::Equals, _)) => {}
                    _ => return Err(ParseError::new(off, "expected '='")),
                }
                let value = lexer.read_value()?;
                // Earlier bindings of this edge shadow the scope.
                let expanded = value.expand(|var| {
                    target
                        .bindings
                        .iter()
                        .rev()
                        .find(|(n, _)| n.as_slice() == var)
                        .map(|(_, v)| v.clone())
                        .or_else(|| arena.lookup_variable(scope, var, offset))
                });
                target.bindings.push((name, expanded));
                match lexer.next_token()? {
                    None | Some((Token::Newline, _)) => {}
                    Some((token, off)) => {
                        return Err(ParseError::new(
                            off,
                            format!("expected end of line, got {}", token),
                        ));
                    }
                }
            }
            Some((token, off)) => {
                return Err(ParseError::new(off, format!("unexpected {}", token)));
            }
        }
    }

    Ok(target)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::ast::{Expr, Rule, Term};
    use crate::result::ParseHandle;

    // Inputs in these tests never contain plain include paths, so nothing
    // gets scheduled.
    struct DummyScheduler;
    impl ChildScheduler for DummyScheduler {
        fn schedule_child(&self, path: &[u8]) -> ParseHandle {
            panic!(
                "unexpected child schedule for {:?}",
                String::from_utf8_lossy(path)
            );
        }
    }

    struct ReadyScheduler;
    impl ChildScheduler for ReadyScheduler {
        fn schedule_child(&self, _path: &[u8]) -> ParseHandle {
            tokio::spawn(async { Ok(ParseResult::default()) })
        }
    }

    fn fragment(input: &str) -> ByteFragment {
        ByteFragment::whole(Arc::from(input.as_bytes()))
    }

    fn parse(input: &str) -> Result<ParseResult, ParseError> {
        let mut result = ParseResult::default();
        parse_fragment(&fragment(input), &DummyScheduler, &mut result)?;
        Ok(result)
    }

    fn lit(s: &str) -> Term {
        Term::Literal(s.as_bytes().to_vec())
    }

    fn var(s: &str) -> Term {
        Term::Reference(s.as_bytes().to_vec())
    }

    #[test]
    fn test_variables() {
        let result = parse("x = 1\n\ny = $x and more\n").expect("parse");
        assert_eq!(
            result.variables,
            vec![
                (0, b"x".to_vec(), Expr::new(vec![lit("1")])),
                (
                    7,
                    b"y".to_vec(),
                    Expr::new(vec![var("x"), lit(" and more")])
                ),
            ]
        );
    }

    #[test]
    fn test_rule() {
        let result = parse("rule cc\n  command = gcc -c $in\n  description = CC $out\n")
            .expect("parse");
        assert_eq!(result.rules.len(), 1);
        let (offset, rule) = &result.rules[0];
        assert_eq!(*offset, 0);
        assert_eq!(rule.name, b"cc");
        assert_eq!(
            rule.bindings.get(&b"command"[..]),
            Some(&Expr::new(vec![lit("gcc -c "), var("in")]))
        );
        assert_eq!(rule.bindings.len(), 2);
    }

    #[test]
    fn test_rule_rejects_unknown_variable() {
        let err = parse("rule cc\n  commannd = gcc\n").unwrap_err();
        assert!(err.message.contains("commannd"), "{}", err);
    }

    #[test]
    fn test_pool() {
        let result = parse("pool link\n  depth = 4\n").expect("parse");
        assert_eq!(result.pools.len(), 1);
        let (_, pool) = &result.pools[0];
        assert_eq!(pool.name, b"link");
        assert_eq!(pool.depth, Expr::new(vec![lit("4")]));
    }

    #[test]
    fn test_pool_requires_depth() {
        let err = parse("pool link\n").unwrap_err();
        assert!(err.message.contains("depth"), "{}", err);
    }

    #[test]
    fn test_build_is_kept_raw() {
        let input = "x = 1\nbuild out.o: cc in.c\n  pool = link\ny = 2\n";
        let result = parse(input).expect("parse");
        assert_eq!(result.targets.len(), 1);
        let raw = &result.targets[0];
        assert_eq!(raw.start_offset(), 6);
        assert_eq!(
            String::from_utf8_lossy(raw.as_bytes()),
            "build out.o: cc in.c\n  pool = link\n"
        );
        // The statement after the build edge is still parsed.
        assert_eq!(result.variables.len(), 2);
    }

    #[test]
    fn test_default() {
        let result = parse("default a b$x\n").expect("parse");
        assert_eq!(result.defaults.len(), 1);
        let (offset, paths) = &result.defaults[0];
        assert_eq!(*offset, 0);
        assert_eq!(
            paths,
            &vec![
                Expr::new(vec![lit("a")]),
                Expr::new(vec![lit("b"), var("x")])
            ]
        );
    }

    #[test]
    fn test_default_requires_a_path() {
        assert!(parse("default\n").is_err());
    }

    #[test]
    fn test_top_level_errors() {
        let table: &[(&str, usize)] = &[
            ("  x = 1\n", 0),    // stray indent
            ("x 1\n", 2),        // missing '='
            (": foo\n", 0),      // stray colon
            ("include\n", 0),    // missing path
        ];
        for (input, offset) in table {
            let err = parse(input).expect_err(input);
            assert_eq!(err.offset, *offset, "input {:?}: {}", input, err);
        }
    }

    #[tokio::test]
    async fn test_include_plain_path_is_scheduled() {
        let mut result = ParseResult::default();
        parse_fragment(
            &fragment("include sub.ninja\n"),
            &ReadyScheduler,
            &mut result,
        )
        .expect("parse");
        assert_eq!(result.includes.len(), 1);
        assert_eq!(result.includes[0].kind, IncludeKind::Include);
        assert!(matches!(
            result.includes[0].promise,
            ParsePromise::Scheduled(_)
        ));
    }

    #[test]
    fn test_subninja_variable_path_is_deferred() {
        let result = parse("subninja $dir/build.ninja\n").expect("parse");
        assert_eq!(result.includes.len(), 1);
        assert_eq!(result.includes[0].kind, IncludeKind::Subninja);
        assert!(matches!(
            result.includes[0].promise,
            ParsePromise::Deferred { .. }
        ));
    }

    fn arena_with_rule(rule: &str) -> (ScopeArena, ScopeId) {
        let (mut arena, root) = ScopeArena::new();
        arena
            .add_rule(
                root,
                0,
                Rule {
                    name: rule.as_bytes().to_vec(),
                    bindings: Default::default(),
                },
            )
            .unwrap();
        (arena, root)
    }

    fn build_fragment(input: &str) -> ByteFragment {
        // Offset the statement so lookups at its offset see scope entries.
        let padded = format!("#{}\n{}", " ".repeat(10), input);
        let buf: Arc<[u8]> = Arc::from(padded.as_bytes());
        let len = buf.len();
        ByteFragment::new(buf, 12, len)
    }

    #[test]
    fn test_parse_target() {
        let (mut arena, root) = arena_with_rule("cc");
        arena.add_variable(root, b"src".to_vec(), 1, b"main.c".to_vec());

        let target = parse_target(
            &build_fragment("build out.o | out.d: cc $src extra.c | dep.h || gen\n  pool = link\n"),
            &arena,
            root,
        )
        .expect("parse");
        assert_eq!(target.outputs, vec![b"out.o".to_vec()]);
        assert_eq!(target.implicit_outputs, vec![b"out.d".to_vec()]);
        assert_eq!(target.rule, b"cc");
        assert_eq!(target.inputs, vec![b"main.c".to_vec(), b"extra.c".to_vec()]);
        assert_eq!(target.implicit_inputs, vec![b"dep.h".to_vec()]);
        assert_eq!(target.order_inputs, vec![b"gen".to_vec()]);
        assert_eq!(
            target.bindings,
            vec![(b"pool".to_vec(), b"link".to_vec())]
        );
        assert_eq!(target.scope, root);
        assert_eq!(target.offset, 12);
    }

    #[test]
    fn test_edge_bindings_see_earlier_bindings() {
        let (mut arena, root) = arena_with_rule("cc");
        arena.add_variable(root, b"obj".to_vec(), 1, b"scope.o".to_vec());

        let target = parse_target(
            &build_fragment("build out: cc in\n  obj = a.o\n  flags = -x $obj\n"),
            &arena,
            root,
        )
        .expect("parse");
        // The edge's own `obj` shadows the scope's for the later binding.
        assert_eq!(
            target.bindings,
            vec![
                (b"obj".to_vec(), b"a.o".to_vec()),
                (b"flags".to_vec(), b"-x a.o".to_vec()),
            ]
        );
    }

    #[test]
    fn test_parse_target_phony_needs_no_rule() {
        let (arena, root) = ScopeArena::new();
        let target = parse_target(&build_fragment("build all: phony a b\n"), &arena, root)
            .expect("parse");
        assert_eq!(target.rule, b"phony");
        assert_eq!(target.inputs.len(), 2);
    }

    #[test]
    fn test_parse_target_unknown_rule() {
        let (arena, root) = ScopeArena::new();
        let err = parse_target(&build_fragment("build a: cc b\n"), &arena, root).unwrap_err();
        assert!(err.message.contains("unknown rule 'cc'"), "{}", err);
    }

    #[test]
    fn test_parse_target_requires_output() {
        let (mut arena, root) = arena_with_rule("cc");
        arena.add_variable(root, b"gone".to_vec(), 1, Vec::new());

        let err = parse_target(&build_fragment("build : cc a\n"), &arena, root).unwrap_err();
        assert!(err.message.contains("output"), "{}", err);

        // An output that expands to nothing is an error, not a silent skip.
        let err = parse_target(&build_fragment("build $gone: cc a\n"), &arena, root).unwrap_err();
        assert!(err.message.contains("empty"), "{}", err);
    }
}
