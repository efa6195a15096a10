//! Whitespace control: applies `~` stripping and removes the lines occupied by
//! standalone tags (blocks, `{{else}}`, partials and comments sitting alone on a line).

use crate::ast::{Program, Statement};

/// What a visited statement asks of its neighbours.
#[derive(Debug, Default, Clone, Copy)]
struct Strip {
    open: bool,
    close: bool,
    open_standalone: bool,
    close_standalone: bool,
    inline_standalone: bool,
}

pub(crate) struct WhitespaceControl {
    ignore_standalone: bool,
    root_seen: bool,
}

impl WhitespaceControl {
    pub(crate) const fn new(ignore_standalone: bool) -> Self {
        Self {
            ignore_standalone,
            root_seen: false,
        }
    }

    /// Rewrites content nodes of `program` in place.
    pub(crate) fn apply(mut self, program: &mut Program) {
        self.program(program);
    }

    fn program(&mut self, program: &mut Program) {
        let do_standalone = !self.ignore_standalone;
        let is_root = !self.root_seen;
        self.root_seen = true;

        let body = &mut program.body;
        for i in 0..body.len() {
            let Some(current) = body.get_mut(i) else {
                break;
            };
            let Some(strip) = self.statement(current) else {
                continue;
            };

            let prev_whitespace = is_prev_whitespace(body, Some(i), is_root);
            let next_whitespace = is_next_whitespace(body, Some(i), is_root);
            let open_standalone = strip.open_standalone && prev_whitespace;
            let close_standalone = strip.close_standalone && next_whitespace;
            let inline_standalone = strip.inline_standalone && prev_whitespace && next_whitespace;

            if strip.close {
                omit_right(body, Some(i), true);
            }
            if strip.open {
                omit_left(body, Some(i), true);
            }

            if do_standalone && inline_standalone {
                omit_right(body, Some(i), false);
                if omit_left(body, Some(i), false) {
                    capture_partial_indent(body, i);
                }
            }

            if do_standalone && open_standalone {
                if let Some(inner) = body.get_mut(i).and_then(|s| primary_program(s)) {
                    omit_right(&mut inner.body, None, false);
                }
                omit_left(body, Some(i), false);
            }

            if do_standalone && close_standalone {
                omit_right(body, Some(i), false);
                if let Some(inner) = body.get_mut(i).and_then(|s| closing_program(s)) {
                    omit_left(&mut inner.body, None, false);
                }
            }
        }
    }

    fn statement(&mut self, statement: &mut Statement) -> Option<Strip> {
        match statement {
            Statement::Mustache(mustache) | Statement::Decorator(mustache) => Some(Strip {
                open: mustache.strip.open,
                close: mustache.strip.close,
                ..Strip::default()
            }),
            Statement::Partial(partial) => Some(Strip {
                open: partial.strip.open,
                close: partial.strip.close,
                inline_standalone: true,
                ..Strip::default()
            }),
            Statement::Comment(comment) => Some(Strip {
                open: comment.strip.open,
                close: comment.strip.close,
                inline_standalone: true,
                ..Strip::default()
            }),
            Statement::Block(block) | Statement::DecoratorBlock(block) => {
                let open_strip = block.open_strip;
                let inverse_strip = block.inverse_strip;
                let close_strip = block.close_strip;
                self.block(
                    block.program.as_mut(),
                    block.inverse.as_mut(),
                    open_strip,
                    inverse_strip,
                    close_strip,
                )
            }
            Statement::PartialBlock(block) => {
                let open_strip = block.open_strip;
                let close_strip = block.close_strip;
                self.block(
                    Some(&mut block.program),
                    None,
                    open_strip,
                    crate::ast::StripFlags::default(),
                    close_strip,
                )
            }
            Statement::Content(_) => None,
        }
    }

    fn block(
        &mut self,
        program: Option<&mut Program>,
        inverse: Option<&mut Program>,
        open_strip: crate::ast::StripFlags,
        inverse_strip: crate::ast::StripFlags,
        close_strip: crate::ast::StripFlags,
    ) -> Option<Strip> {
        // An inverted block stores its only body as the inverse.
        let (program, mut inverse) = match (program, inverse) {
            (Some(program), inverse) => (program, inverse),
            (None, Some(inverse)) => (inverse, None),
            (None, None) => return None,
        };

        self.program(program);
        if let Some(inverse) = inverse.as_deref_mut() {
            self.program(inverse);
        }

        let open_standalone = is_next_whitespace(&program.body, None, false);
        let close_standalone = match inverse.as_deref() {
            Some(inverse) => is_prev_whitespace(&first_inverse(inverse).body, None, false),
            None => is_prev_whitespace(&program.body, None, false),
        };
        let strip = Strip {
            open: open_strip.open,
            close: close_strip.close,
            open_standalone,
            close_standalone,
            inline_standalone: false,
        };

        if open_strip.close {
            omit_right(&mut program.body, None, true);
        }

        if let Some(inverse) = inverse {
            if inverse_strip.open {
                omit_left(&mut program.body, None, true);
            }
            if inverse_strip.close {
                with_first_inverse(inverse, |p| omit_right(&mut p.body, None, true));
            }
            if close_strip.open {
                with_last_inverse(inverse, |p| {
                    omit_left(&mut p.body, None, true);
                });
            }

            // Standalone `{{else}}`.
            if !self.ignore_standalone
                && is_prev_whitespace(&program.body, None, false)
                && is_next_whitespace(&first_inverse(inverse).body, None, false)
            {
                omit_left(&mut program.body, None, false);
                with_first_inverse(inverse, |p| omit_right(&mut p.body, None, false));
            }
        } else if close_strip.open {
            omit_left(&mut program.body, None, true);
        }

        Some(strip)
    }
}

/// The body that follows the open tag of a block-like statement.
fn primary_program(statement: &mut Statement) -> Option<&mut Program> {
    match statement {
        Statement::Block(block) | Statement::DecoratorBlock(block) => {
            block.program.as_mut().or(block.inverse.as_mut())
        }
        Statement::PartialBlock(block) => Some(&mut block.program),
        Statement::Mustache(_)
        | Statement::Decorator(_)
        | Statement::Partial(_)
        | Statement::Content(_)
        | Statement::Comment(_) => None,
    }
}

/// The body that precedes the close tag of a block-like statement.
fn closing_program(statement: &mut Statement) -> Option<&mut Program> {
    match statement {
        Statement::Block(block) | Statement::DecoratorBlock(block) => {
            block.inverse.as_mut().or(block.program.as_mut())
        }
        Statement::PartialBlock(block) => Some(&mut block.program),
        Statement::Mustache(_)
        | Statement::Decorator(_)
        | Statement::Partial(_)
        | Statement::Content(_)
        | Statement::Comment(_) => None,
    }
}

/// For an `{{else if}}` chain, the body of the first chained block.
fn first_inverse(inverse: &Program) -> &Program {
    if inverse.chained {
        if let Some(Statement::Block(block)) = inverse.body.first() {
            if let Some(program) = block.program.as_ref() {
                return program;
            }
        }
    }
    inverse
}

fn with_first_inverse<F: FnOnce(&mut Program)>(inverse: &mut Program, f: F) {
    if inverse.chained {
        if let Some(Statement::Block(block)) = inverse.body.first_mut() {
            if let Some(program) = block.program.as_mut() {
                return f(program);
            }
        }
    }
    f(inverse);
}

/// For an `{{else if}}` chain, the body of the last chained block.
fn with_last_inverse<F: FnOnce(&mut Program)>(inverse: &mut Program, f: F) {
    if inverse.chained {
        if let Some(Statement::Block(block)) = inverse.body.last_mut() {
            if let Some(program) = block.program.as_mut() {
                return with_last_inverse(program, f);
            }
        }
    }
    f(inverse);
}

fn content_original(statement: Option<&Statement>) -> Option<&str> {
    match statement {
        Some(Statement::Content(content)) => Some(&content.original),
        _ => None,
    }
}

/// Whether the statement before `i` (or the end of `body` when `i` is `None`)
/// ends with a newline and trailing whitespace.
fn is_prev_whitespace(body: &[Statement], i: Option<usize>, is_root: bool) -> bool {
    let i = i.unwrap_or(body.len());
    let Some(prev_index) = i.checked_sub(1) else {
        return is_root;
    };
    let Some(prev) = body.get(prev_index) else {
        return is_root;
    };
    let has_sibling = prev_index.checked_sub(1).and_then(|s| body.get(s)).is_some();

    let Some(original) = content_original(Some(prev)) else {
        return false;
    };
    let after_newline = original
        .rfind('\n')
        .and_then(|pos| original.get(pos.saturating_add(1)..))
        .is_some_and(|rest| rest.chars().all(char::is_whitespace));

    if has_sibling || !is_root {
        after_newline
    } else {
        after_newline || original.chars().all(char::is_whitespace)
    }
}

/// Whether the statement after `i` (or the start of `body` when `i` is `None`)
/// begins with whitespace and a newline.
fn is_next_whitespace(body: &[Statement], i: Option<usize>, is_root: bool) -> bool {
    let next_index = i.map_or(0, |i| i.saturating_add(1));
    let Some(next) = body.get(next_index) else {
        return is_root;
    };
    let has_sibling = body.get(next_index.saturating_add(1)).is_some();

    let Some(original) = content_original(Some(next)) else {
        return false;
    };
    let before_newline = original
        .find('\n')
        .and_then(|pos| original.get(..pos))
        .is_some_and(|head| head.chars().all(char::is_whitespace));

    if has_sibling || !is_root {
        before_newline
    } else {
        before_newline || original.chars().all(char::is_whitespace)
    }
}

/// Strips leading whitespace from the content after `i` (or the first
/// statement when `i` is `None`). Without `multiple`, only through the first newline.
fn omit_right(body: &mut [Statement], i: Option<usize>, multiple: bool) {
    let index = i.map_or(0, |i| i.saturating_add(1));
    let Some(Statement::Content(current)) = body.get_mut(index) else {
        return;
    };
    if !multiple && current.right_stripped {
        return;
    }

    let stripped = if multiple {
        current.value.trim_start()
    } else {
        let rest = current.value.trim_start_matches([' ', '\t']);
        let rest = rest.strip_prefix('\r').unwrap_or(rest);
        rest.strip_prefix('\n').unwrap_or(rest)
    };

    if stripped.len() != current.value.len() {
        current.value = stripped.to_string();
        current.right_stripped = true;
    } else {
        current.right_stripped = false;
    }
}

/// Strips trailing whitespace from the content before `i` (or the last
/// statement when `i` is `None`). Without `multiple`, only spaces and tabs.
/// Returns whether anything was removed.
fn omit_left(body: &mut [Statement], i: Option<usize>, multiple: bool) -> bool {
    let index = match i {
        Some(i) => i.checked_sub(1),
        None => body.len().checked_sub(1),
    };
    let Some(Statement::Content(current)) = index.and_then(|index| body.get_mut(index)) else {
        return false;
    };
    if !multiple && current.left_stripped {
        return false;
    }

    let stripped = if multiple {
        current.value.trim_end()
    } else {
        current.value.trim_end_matches([' ', '\t'])
    };

    current.left_stripped = stripped.len() != current.value.len();
    if current.left_stripped {
        current.value = stripped.to_string();
    }
    current.left_stripped
}

/// A standalone partial remembers the indentation it was written at.
fn capture_partial_indent(body: &mut [Statement], i: usize) {
    let indent = i
        .checked_sub(1)
        .and_then(|prev| content_original(body.get(prev)))
        .map(|original| {
            let trimmed = original.trim_end_matches([' ', '\t']);
            original.get(trimmed.len()..).unwrap_or("").to_string()
        })
        .unwrap_or_default();

    if let Some(Statement::Partial(partial)) = body.get_mut(i) {
        partial.indent = indent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn normalized(source: &str) -> Program {
        let mut program = parse(source).unwrap();
        WhitespaceControl::new(false).apply(&mut program);
        program
    }

    /// Concatenated content of the top-level body and the first level of
    /// block bodies, which is enough to check what survives stripping.
    fn texts(program: &Program) -> Vec<String> {
        let mut out = Vec::new();
        for statement in &program.body {
            match statement {
                Statement::Content(c) => out.push(c.value.clone()),
                Statement::Block(b) => {
                    for inner in [&b.program, &b.inverse].into_iter().flatten() {
                        out.extend(texts(inner));
                    }
                }
                Statement::Partial(p) => out.push(format!("<{}>", p.indent)),
                _ => {}
            }
        }
        out
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_tilde_strips_neighbours() {
        let program = normalized("a  \n {{~x~}} \n b");
        assert_eq!(texts(&program), vec!["a", "b"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_standalone_block_lines_removed() {
        let program = normalized("{{#each items}}\n  {{this}}\n{{/each}}\n");
        assert_eq!(texts(&program), vec!["  ", "\n", ""]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_standalone_else() {
        let program = normalized("{{#if a}}\nyes\n{{else}}\nno\n{{/if}}\n");
        assert_eq!(texts(&program), vec!["yes\n", "no\n", ""]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_mustache_never_standalone() {
        let program = normalized("  {{x}}\n");
        assert_eq!(texts(&program), vec!["  ", "\n"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_standalone_comment() {
        let program = normalized("a\n  {{! note }}\nb");
        assert_eq!(texts(&program), vec!["a\n", "b"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_partial_indent_captured() {
        let program = normalized("x\n    {{> item}}\ny");
        assert_eq!(texts(&program), vec!["x\n", "<    >", "y"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_ignore_standalone() {
        let mut program = parse("{{#if a}}\nyes\n{{/if}}\n").unwrap();
        WhitespaceControl::new(true).apply(&mut program);
        assert_eq!(texts(&program), vec!["\nyes\n", "\n"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_inline_block_untouched() {
        let program = normalized("a {{#if x}} b {{/if}} c");
        assert_eq!(texts(&program), vec!["a ", " b ", " c"]);
    }
}
