//! Lua pattern matching that answers to the VM deadline.
//!
//! The C versions of `string.find`, `string.match`, `string.gmatch` and
//! `string.gsub` never return to the instruction hook, so a backtracking
//! pattern over a long subject would run past its deadline. These
//! replacements keep Lua 5.4 semantics and consult the [`Watchdog`] while
//! matching.

use std::cell::Cell;

use mlua::{Function, Lua, MultiValue, Table, Value as LuaValue};

use crate::watchdog::Watchdog;

const ESC: u8 = b'%';
const SPECIALS: &[u8] = b"^$*+?.([%-";
const MAX_CAPTURES: usize = 32;
const MAX_DEPTH: usize = 200;
const CHECK_EVERY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureLen {
    Unfinished,
    Position,
    Len(usize),
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    init: usize,
    len: CaptureLen,
}

/// One captured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Captured<'a> {
    Text(&'a [u8]),
    /// 1-based subject offset from a `()` capture.
    Position(usize),
}

/// Backtracking matcher over byte offsets.
pub(crate) struct MatchState<'a> {
    src: &'a [u8],
    pat: &'a [u8],
    level: usize,
    slots: [Slot; MAX_CAPTURES],
    depth: usize,
    steps: usize,
    watchdog: &'a Watchdog,
}

fn error(message: impl Into<String>) -> mlua::Error {
    mlua::Error::RuntimeError(message.into())
}

impl<'a> MatchState<'a> {
    pub(crate) fn new(src: &'a [u8], pat: &'a [u8], watchdog: &'a Watchdog) -> Self {
        Self {
            src,
            pat,
            level: 0,
            slots: [Slot {
                init: 0,
                len: CaptureLen::Unfinished,
            }; MAX_CAPTURES],
            depth: 0,
            steps: 0,
            watchdog,
        }
    }

    fn reset(&mut self) {
        self.level = 0;
        self.depth = 0;
    }

    fn tick(&mut self) -> mlua::Result<()> {
        self.steps = self.steps.wrapping_add(1);
        if self.steps % CHECK_EVERY == 0 {
            self.watchdog.check()?;
        }
        Ok(())
    }

    /// Matches the pattern from `p` against the subject from `s` and
    /// returns the end offset of the match.
    pub(crate) fn do_match(&mut self, s: usize, p: usize) -> mlua::Result<Option<usize>> {
        if self.depth == MAX_DEPTH {
            return Err(error("pattern too complex"));
        }
        self.depth += 1;
        let result = self.match_here(s, p);
        self.depth -= 1;
        result
    }

    fn match_here(&mut self, mut s: usize, mut p: usize) -> mlua::Result<Option<usize>> {
        loop {
            self.tick()?;
            if p == self.pat.len() {
                return Ok(Some(s));
            }
            match self.pat[p] {
                b'(' => {
                    return if self.pat.get(p + 1) == Some(&b')') {
                        self.start_capture(s, p + 2, CaptureLen::Position)
                    } else {
                        self.start_capture(s, p + 1, CaptureLen::Unfinished)
                    };
                }
                b')' => return self.end_capture(s, p + 1),
                b'$' if p + 1 == self.pat.len() => {
                    return Ok((s == self.src.len()).then_some(s));
                }
                ESC if self.pat.get(p + 1) == Some(&b'b') => match self.match_balance(s, p + 2)? {
                    Some(end) => {
                        s = end;
                        p += 4;
                    }
                    None => return Ok(None),
                },
                ESC if self.pat.get(p + 1) == Some(&b'f') => {
                    p += 2;
                    if self.pat.get(p) != Some(&b'[') {
                        return Err(error("missing '[' after '%f' in pattern"));
                    }
                    let end = self.class_end(p)?;
                    let previous = if s == 0 { 0 } else { self.src[s - 1] };
                    let current = self.src.get(s).copied().unwrap_or(0);
                    if self.match_bracket_class(previous, p, end - 1)
                        || !self.match_bracket_class(current, p, end - 1)
                    {
                        return Ok(None);
                    }
                    p = end;
                }
                ESC if self.pat.get(p + 1).is_some_and(u8::is_ascii_digit) => {
                    match self.match_capture(s, self.pat[p + 1])? {
                        Some(end) => {
                            s = end;
                            p += 2;
                        }
                        None => return Ok(None),
                    }
                }
                _ => {
                    let end = self.class_end(p)?;
                    let quantifier = self.pat.get(end).copied();
                    if !self.single_match(s, p, end) {
                        if matches!(quantifier, Some(b'*' | b'?' | b'-')) {
                            p = end + 1;
                            continue;
                        }
                        return Ok(None);
                    }
                    match quantifier {
                        Some(b'?') => {
                            if let Some(res) = self.do_match(s + 1, end + 1)? {
                                return Ok(Some(res));
                            }
                            p = end + 1;
                        }
                        Some(b'+') => return self.max_expand(s + 1, p, end),
                        Some(b'*') => return self.max_expand(s, p, end),
                        Some(b'-') => return self.min_expand(s, p, end),
                        _ => {
                            s += 1;
                            p = end;
                        }
                    }
                }
            }
        }
    }

    /// Index just past the single-character class starting at `p`.
    fn class_end(&self, mut p: usize) -> mlua::Result<usize> {
        let first = self.pat[p];
        p += 1;
        match first {
            ESC => {
                if p >= self.pat.len() {
                    return Err(error("malformed pattern (ends with '%')"));
                }
                Ok(p + 1)
            }
            b'[' => {
                if self.pat.get(p) == Some(&b'^') {
                    p += 1;
                }
                loop {
                    if p >= self.pat.len() {
                        return Err(error("malformed pattern (missing ']')"));
                    }
                    let c = self.pat[p];
                    p += 1;
                    if c == ESC && p < self.pat.len() {
                        p += 1;
                    }
                    if self.pat.get(p) == Some(&b']') {
                        return Ok(p + 1);
                    }
                }
            }
            _ => Ok(p),
        }
    }

    fn single_match(&self, s: usize, p: usize, ep: usize) -> bool {
        let Some(&c) = self.src.get(s) else {
            return false;
        };
        match self.pat[p] {
            b'.' => true,
            ESC => match_class(c, self.pat[p + 1]),
            b'[' => self.match_bracket_class(c, p, ep - 1),
            literal => literal == c,
        }
    }

    /// `p` points at `[`, `ec` at the closing `]`.
    fn match_bracket_class(&self, c: u8, mut p: usize, ec: usize) -> bool {
        let mut negate = false;
        if self.pat[p + 1] == b'^' {
            negate = true;
            p += 1;
        }
        p += 1;
        while p < ec {
            if self.pat[p] == ESC {
                p += 1;
                if match_class(c, self.pat[p]) {
                    return !negate;
                }
            } else if self.pat[p + 1] == b'-' && p + 2 < ec {
                if self.pat[p] <= c && c <= self.pat[p + 2] {
                    return !negate;
                }
                p += 2;
            } else if self.pat[p] == c {
                return !negate;
            }
            p += 1;
        }
        negate
    }

    fn max_expand(&mut self, s: usize, p: usize, ep: usize) -> mlua::Result<Option<usize>> {
        let mut count = 0;
        while self.single_match(s + count, p, ep) {
            count += 1;
            self.tick()?;
        }
        loop {
            if let Some(end) = self.do_match(s + count, ep + 1)? {
                return Ok(Some(end));
            }
            if count == 0 {
                return Ok(None);
            }
            count -= 1;
        }
    }

    fn min_expand(&mut self, mut s: usize, p: usize, ep: usize) -> mlua::Result<Option<usize>> {
        loop {
            if let Some(end) = self.do_match(s, ep + 1)? {
                return Ok(Some(end));
            }
            if !self.single_match(s, p, ep) {
                return Ok(None);
            }
            s += 1;
        }
    }

    fn start_capture(&mut self, s: usize, p: usize, len: CaptureLen) -> mlua::Result<Option<usize>> {
        if self.level >= MAX_CAPTURES {
            return Err(error("too many captures"));
        }
        self.slots[self.level] = Slot { init: s, len };
        self.level += 1;
        let result = self.do_match(s, p)?;
        if result.is_none() {
            self.level -= 1;
        }
        Ok(result)
    }

    fn end_capture(&mut self, s: usize, p: usize) -> mlua::Result<Option<usize>> {
        let open = (0..self.level)
            .rev()
            .find(|&i| self.slots[i].len == CaptureLen::Unfinished)
            .ok_or_else(|| error("invalid pattern capture"))?;
        self.slots[open].len = CaptureLen::Len(s - self.slots[open].init);
        let result = self.do_match(s, p)?;
        if result.is_none() {
            self.slots[open].len = CaptureLen::Unfinished;
        }
        Ok(result)
    }

    /// `p` points at the two delimiter bytes after `%b`.
    fn match_balance(&mut self, s: usize, p: usize) -> mlua::Result<Option<usize>> {
        if p + 1 >= self.pat.len() {
            return Err(error("malformed pattern (missing arguments to '%b')"));
        }
        let (open, close) = (self.pat[p], self.pat[p + 1]);
        if self.src.get(s) != Some(&open) {
            return Ok(None);
        }
        let mut depth = 1_usize;
        for i in s + 1..self.src.len() {
            self.tick()?;
            let c = self.src[i];
            if c == close {
                depth -= 1;
                if depth == 0 {
                    return Ok(Some(i + 1));
                }
            } else if c == open {
                depth += 1;
            }
        }
        Ok(None)
    }

    fn match_capture(&self, s: usize, digit: u8) -> mlua::Result<Option<usize>> {
        let index = usize::from(digit.wrapping_sub(b'1'));
        if index >= self.level || self.slots[index].len == CaptureLen::Unfinished {
            return Err(error(format!("invalid capture index %{}", char::from(digit))));
        }
        let Slot { init, len } = self.slots[index];
        let CaptureLen::Len(len) = len else {
            return Ok(None);
        };
        let captured = &self.src[init..init + len];
        Ok(self
            .src
            .get(s..s + len)
            .filter(|window| *window == captured)
            .map(|_| s + len))
    }

    fn subject(&self, s: usize, e: usize) -> &'a [u8] {
        let src = self.src;
        &src[s..e]
    }

    pub(crate) fn capture(&self, index: usize, s: usize, e: usize) -> mlua::Result<Captured<'a>> {
        if index >= self.level {
            if index == 0 {
                return Ok(Captured::Text(self.subject(s, e)));
            }
            return Err(error(format!("invalid capture index %{}", index + 1)));
        }
        let Slot { init, len } = self.slots[index];
        match len {
            CaptureLen::Unfinished => Err(error("unfinished capture")),
            CaptureLen::Position => Ok(Captured::Position(init + 1)),
            CaptureLen::Len(len) => Ok(Captured::Text(self.subject(init, init + len))),
        }
    }

    /// All captures of the last match; the whole match when there are none
    /// and `whole_if_none` is set.
    pub(crate) fn captures(&self, s: usize, e: usize, whole_if_none: bool) -> mlua::Result<Vec<Captured<'a>>> {
        let count = if self.level == 0 && whole_if_none {
            1
        } else {
            self.level
        };
        (0..count).map(|i| self.capture(i, s, e)).collect()
    }
}

fn match_class(c: u8, class: u8) -> bool {
    let matched = match class.to_ascii_lowercase() {
        b'a' => c.is_ascii_alphabetic(),
        b'c' => c.is_ascii_control(),
        b'd' => c.is_ascii_digit(),
        b'g' => c.is_ascii_graphic(),
        b'l' => c.is_ascii_lowercase(),
        b'p' => c.is_ascii_punctuation(),
        b's' => c.is_ascii_whitespace() || c == 0x0b,
        b'u' => c.is_ascii_uppercase(),
        b'w' => c.is_ascii_alphanumeric(),
        b'x' => c.is_ascii_hexdigit(),
        _ => return class == c,
    };
    if class.is_ascii_uppercase() {
        !matched
    } else {
        matched
    }
}

/// Resolves a 1-based, possibly negative start position to a 0-based
/// offset. `None` when it lies past the end of the subject.
fn start_offset(init: Option<i64>, len: usize) -> Option<usize> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let position = match init.unwrap_or(1) {
        position if position > 0 => position,
        position if position == 0 || position < -len => 1,
        position => len + position + 1,
    };
    if position > len + 1 {
        return None;
    }
    usize::try_from(position - 1).ok()
}

fn integer(value: usize) -> LuaValue {
    LuaValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}

fn capture_value(lua: &Lua, captured: Captured<'_>) -> mlua::Result<LuaValue> {
    match captured {
        Captured::Text(bytes) => lua.create_string(bytes).map(LuaValue::String),
        Captured::Position(position) => Ok(integer(position)),
    }
}

fn capture_values(lua: &Lua, captured: Vec<Captured<'_>>) -> mlua::Result<MultiValue> {
    captured
        .into_iter()
        .map(|value| capture_value(lua, value))
        .collect()
}

fn split_anchor(pattern: &[u8]) -> (bool, &[u8]) {
    match pattern.strip_prefix(b"^") {
        Some(rest) => (true, rest),
        None => (false, pattern),
    }
}

fn fail() -> MultiValue {
    std::iter::once(LuaValue::Nil).collect()
}

fn find_plain(haystack: &[u8], needle: &[u8], watchdog: &Watchdog) -> mlua::Result<Option<usize>> {
    if needle.is_empty() {
        return Ok(Some(0));
    }
    for (index, window) in haystack.windows(needle.len()).enumerate() {
        if index % CHECK_EVERY == 0 {
            watchdog.check()?;
        }
        if window == needle {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

#[derive(Debug, Clone, Copy)]
enum Search {
    Find { plain: bool },
    Match,
}

fn search(
    lua: &Lua,
    watchdog: &Watchdog,
    subject: &[u8],
    pattern: &[u8],
    init: Option<i64>,
    mode: Search,
) -> mlua::Result<MultiValue> {
    let Some(start) = start_offset(init, subject.len()) else {
        return Ok(fail());
    };

    if let Search::Find { plain } = mode {
        if plain || !pattern.iter().any(|byte| SPECIALS.contains(byte)) {
            return Ok(match find_plain(&subject[start..], pattern, watchdog)? {
                Some(at) => [integer(start + at + 1), integer(start + at + pattern.len())]
                    .into_iter()
                    .collect(),
                None => fail(),
            });
        }
    }

    let (anchored, body) = split_anchor(pattern);
    let mut state = MatchState::new(subject, body, watchdog);
    let mut s = start;
    loop {
        state.reset();
        if let Some(e) = state.do_match(s, 0)? {
            return match mode {
                Search::Find { .. } => {
                    let mut values = capture_values(lua, state.captures(s, e, false)?)?;
                    values.push_front(integer(e));
                    values.push_front(integer(s + 1));
                    Ok(values)
                }
                Search::Match => capture_values(lua, state.captures(s, e, true)?),
            };
        }
        s += 1;
        if anchored || s > subject.len() {
            return Ok(fail());
        }
    }
}

fn gmatch(lua: &Lua, watchdog: &Watchdog, subject: Vec<u8>, pattern: Vec<u8>, init: Option<i64>) -> mlua::Result<Function> {
    let start = start_offset(init, subject.len()).unwrap_or(subject.len());
    let position = Cell::new(start);
    let last_match = Cell::new(None::<usize>);
    let watchdog = watchdog.clone();
    lua.create_function(move |lua, ()| {
        let mut state = MatchState::new(&subject, &pattern, &watchdog);
        let mut s = position.get();
        while s <= subject.len() {
            state.reset();
            if let Some(e) = state.do_match(s, 0)? {
                if last_match.get() != Some(e) {
                    position.set(e);
                    last_match.set(Some(e));
                    return capture_values(lua, state.captures(s, e, true)?);
                }
            }
            s += 1;
        }
        position.set(s);
        Ok(MultiValue::new())
    })
}

enum Replacement {
    Template(Vec<u8>),
    Table(Table),
    Function(Function),
}

impl Replacement {
    fn from_lua(lua: &Lua, value: LuaValue) -> mlua::Result<Self> {
        match value {
            LuaValue::Table(table) => Ok(Self::Table(table)),
            LuaValue::Function(function) => Ok(Self::Function(function)),
            LuaValue::String(_) | LuaValue::Integer(_) | LuaValue::Number(_) => {
                let text = lua
                    .coerce_string(value)?
                    .map(|text| text.as_bytes().to_vec())
                    .unwrap_or_default();
                Ok(Self::Template(text))
            }
            other => Err(error(format!(
                "bad argument #3 to 'gsub' (string/function/table expected, got {})",
                other.type_name()
            ))),
        }
    }

    fn append(&self, lua: &Lua, state: &MatchState<'_>, s: usize, e: usize, out: &mut Vec<u8>) -> mlua::Result<()> {
        let value = match self {
            Self::Template(template) => return expand_template(state, s, e, template, out),
            Self::Table(table) => {
                let key = capture_value(lua, state.capture(0, s, e)?)?;
                table.get::<LuaValue>(key)?
            }
            Self::Function(function) => {
                function.call::<LuaValue>(capture_values(lua, state.captures(s, e, true)?)?)?
            }
        };
        match value {
            LuaValue::Nil | LuaValue::Boolean(false) => out.extend_from_slice(state.subject(s, e)),
            LuaValue::String(text) => out.extend_from_slice(&text.as_bytes()),
            number @ (LuaValue::Integer(_) | LuaValue::Number(_)) => {
                if let Some(text) = lua.coerce_string(number)? {
                    out.extend_from_slice(&text.as_bytes());
                }
            }
            other => {
                return Err(error(format!(
                    "invalid replacement value (a {})",
                    other.type_name()
                )));
            }
        }
        Ok(())
    }
}

fn expand_template(state: &MatchState<'_>, s: usize, e: usize, template: &[u8], out: &mut Vec<u8>) -> mlua::Result<()> {
    let mut i = 0;
    while i < template.len() {
        let byte = template[i];
        i += 1;
        if byte != ESC {
            out.push(byte);
            continue;
        }
        match template.get(i).copied() {
            Some(ESC) => out.push(ESC),
            Some(b'0') => out.extend_from_slice(state.subject(s, e)),
            Some(digit) if digit.is_ascii_digit() => {
                match state.capture(usize::from(digit - b'1'), s, e)? {
                    Captured::Text(text) => out.extend_from_slice(text),
                    Captured::Position(position) => out.extend_from_slice(position.to_string().as_bytes()),
                }
            }
            _ => return Err(error("invalid use of '%' in replacement string")),
        }
        i += 1;
    }
    Ok(())
}

fn gsub(
    lua: &Lua,
    watchdog: &Watchdog,
    subject: &[u8],
    pattern: &[u8],
    replacement: &Replacement,
    max: Option<i64>,
) -> mlua::Result<(mlua::String, i64)> {
    let max = max.unwrap_or_else(|| i64::try_from(subject.len()).unwrap_or(i64::MAX).saturating_add(1));
    let (anchored, body) = split_anchor(pattern);
    let mut state = MatchState::new(subject, body, watchdog);
    let mut out = Vec::with_capacity(subject.len());
    let mut s = 0;
    let mut last_match = None;
    let mut count = 0_i64;

    while count < max {
        state.reset();
        match state.do_match(s, 0)? {
            Some(e) if last_match != Some(e) => {
                count += 1;
                replacement.append(lua, &state, s, e, &mut out)?;
                s = e;
                last_match = Some(e);
            }
            _ if s < subject.len() => {
                out.push(subject[s]);
                s += 1;
            }
            _ => break,
        }
        if anchored {
            break;
        }
    }
    out.extend_from_slice(&subject[s..]);
    Ok((lua.create_string(&out)?, count))
}

fn is_truthy(value: &LuaValue) -> bool {
    !matches!(value, LuaValue::Nil | LuaValue::Boolean(false))
}

/// Replaces the pattern functions of the `string` table. Method calls on
/// strings resolve through the same table.
pub(crate) fn install(lua: &Lua, watchdog: &Watchdog) -> mlua::Result<()> {
    let string: Table = lua.globals().get("string")?;

    let dog = watchdog.clone();
    string.set(
        "find",
        lua.create_function(
            move |lua, (subject, pattern, init, plain): (mlua::String, mlua::String, Option<i64>, LuaValue)| {
                let mode = Search::Find {
                    plain: is_truthy(&plain),
                };
                search(lua, &dog, &subject.as_bytes(), &pattern.as_bytes(), init, mode)
            },
        )?,
    )?;

    let dog = watchdog.clone();
    string.set(
        "match",
        lua.create_function(
            move |lua, (subject, pattern, init): (mlua::String, mlua::String, Option<i64>)| {
                search(lua, &dog, &subject.as_bytes(), &pattern.as_bytes(), init, Search::Match)
            },
        )?,
    )?;

    let dog = watchdog.clone();
    string.set(
        "gmatch",
        lua.create_function(
            move |lua, (subject, pattern, init): (mlua::String, mlua::String, Option<i64>)| {
                gmatch(
                    lua,
                    &dog,
                    subject.as_bytes().to_vec(),
                    pattern.as_bytes().to_vec(),
                    init,
                )
            },
        )?,
    )?;

    let dog = watchdog.clone();
    string.set(
        "gsub",
        lua.create_function(
            move |lua, (subject, pattern, replacement, max): (mlua::String, mlua::String, LuaValue, Option<i64>)| {
                let replacement = Replacement::from_lua(lua, replacement)?;
                gsub(lua, &dog, &subject.as_bytes(), &pattern.as_bytes(), &replacement, max)
            },
        )?,
    )?;

    Ok(())
}
