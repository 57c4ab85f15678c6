//! 行协议编解码
//!
//! `measurement,tag1=v1,tag2=v2 field1=1,field2="v2" <unix_ns>`
//!
//! 标签按键排序；measurement、键和标签值中的 `\`、`,`、`=`、空格与换行
//! 用反斜杠转义；字符串字段值用双引号包裹，内部的 `"` 与 `\` 转义；
//! 浮点数总是带小数点或指数，从而与整数区分。

use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::{FieldValue, PointError, TelemetryPoint};

/// 行协议错误
#[derive(Debug, Error, PartialEq)]
pub enum LineProtocolError {
    #[error("point has no fields")]
    NoFields,

    #[error("timestamp out of nanosecond range: {0}")]
    TimestampOutOfRange(DateTime<Utc>),

    #[error("unexpected end of line while reading {0}")]
    UnexpectedEnd(&'static str),

    #[error("missing '=' in {0}")]
    MissingEquals(&'static str),

    #[error("invalid field value: {0}")]
    InvalidFieldValue(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error(transparent)]
    Point(#[from] PointError),
}

/// 编码单个数据点
pub fn encode_point(point: &TelemetryPoint) -> Result<String, LineProtocolError> {
    if point.fields().is_empty() {
        return Err(LineProtocolError::NoFields);
    }

    let nanos = point
        .timestamp()
        .timestamp_nanos_opt()
        .ok_or(LineProtocolError::TimestampOutOfRange(point.timestamp()))?;

    let mut line = escape_token(point.measurement());

    for (key, value) in point.tags() {
        line.push(',');
        line.push_str(&escape_token(key));
        line.push('=');
        line.push_str(&escape_token(value));
    }

    line.push(' ');
    let fields: Vec<String> = point
        .fields()
        .iter()
        .map(|(key, value)| format!("{}={}", escape_token(key), encode_field_value(value)))
        .collect();
    line.push_str(&fields.join(","));

    line.push(' ');
    line.push_str(&nanos.to_string());

    Ok(line)
}

/// 编码多个数据点，每行一个
pub fn encode_points(points: &[TelemetryPoint]) -> Result<String, LineProtocolError> {
    let lines = points
        .iter()
        .map(encode_point)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

fn escape_token(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' | ',' | '=' | ' ' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

fn encode_field_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Int(i) => i.to_string(),
        // Debug 输出总是保留小数点或指数
        FieldValue::Float(f) => format!("{:?}", f),
        FieldValue::Str(s) => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' | '\\' => {
                        out.push('\\');
                        out.push(c);
                    }
                    '\n' => out.push_str("\\n"),
                    _ => out.push(c),
                }
            }
            out.push('"');
            out
        }
    }
}

/// 解析单行
pub fn parse_line(line: &str) -> Result<TelemetryPoint, LineProtocolError> {
    let mut cursor = Cursor::new(line.trim_end_matches(['\r', '\n']));

    let (measurement, stop) = cursor.read_token(&[',', ' '], "measurement")?;

    let mut tags = BTreeMap::new();
    let mut stop = stop;
    while stop == ',' {
        let (key, sep) = cursor.read_token(&['=', ',', ' '], "tag key")?;
        if sep != '=' {
            return Err(LineProtocolError::MissingEquals("tag"));
        }
        let (value, next) = cursor.read_token(&[',', ' '], "tag value")?;
        tags.insert(key, value);
        stop = next;
    }

    let mut fields = BTreeMap::new();
    loop {
        let (key, sep) = cursor.read_token(&['=', ',', ' '], "field key")?;
        if sep != '=' {
            return Err(LineProtocolError::MissingEquals("field"));
        }
        let (value, next) = if cursor.peek() == Some('"') {
            let value = cursor.read_quoted()?;
            let next = cursor.next().ok_or(LineProtocolError::UnexpectedEnd("fields"))?;
            (FieldValue::Str(value), next)
        } else {
            let (raw, next) = cursor.read_token(&[',', ' '], "field value")?;
            (parse_unquoted_value(&raw)?, next)
        };
        fields.insert(key, value);
        if next != ',' {
            break;
        }
    }

    let rest = cursor.rest();
    let raw_ts = rest.trim();
    let nanos: i64 = raw_ts
        .parse()
        .map_err(|_| LineProtocolError::InvalidTimestamp(raw_ts.to_string()))?;
    let timestamp = Utc.timestamp_nanos(nanos);

    Ok(TelemetryPoint::new(measurement, timestamp, tags, fields)?)
}

/// 解析多行文本，跳过空行和 `#` 注释
pub fn parse_lines(text: &str) -> Result<Vec<TelemetryPoint>, LineProtocolError> {
    text.lines()
        .map(str::trim_start)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(parse_line)
        .collect()
}

fn parse_unquoted_value(raw: &str) -> Result<FieldValue, LineProtocolError> {
    match raw {
        "true" | "t" | "T" | "TRUE" | "True" => return Ok(FieldValue::Bool(true)),
        "false" | "f" | "F" | "FALSE" | "False" => return Ok(FieldValue::Bool(false)),
        _ => {}
    }

    if raw.contains(['.', 'e', 'E']) {
        return raw
            .parse::<f64>()
            .map(FieldValue::Float)
            .map_err(|_| LineProtocolError::InvalidFieldValue(raw.to_string()));
    }

    raw.strip_suffix('i')
        .unwrap_or(raw)
        .parse::<i64>()
        .map(FieldValue::Int)
        .map_err(|_| LineProtocolError::InvalidFieldValue(raw.to_string()))
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
}

impl Cursor {
    fn new(line: &str) -> Self {
        Self {
            chars: line.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn rest(&self) -> String {
        self.chars[self.pos.min(self.chars.len())..].iter().collect()
    }

    /// 读取到未转义的分隔符为止，返回 (内容, 分隔符)
    fn read_token(
        &mut self,
        stops: &[char],
        what: &'static str,
    ) -> Result<(String, char), LineProtocolError> {
        let mut out = String::new();
        while let Some(c) = self.next() {
            if c == '\\' {
                match self.next() {
                    Some('n') => out.push('\n'),
                    Some(escaped) => out.push(escaped),
                    None => out.push('\\'),
                }
            } else if stops.contains(&c) {
                return Ok((out, c));
            } else {
                out.push(c);
            }
        }
        Err(LineProtocolError::UnexpectedEnd(what))
    }

    fn read_quoted(&mut self) -> Result<String, LineProtocolError> {
        // 跳过起始引号
        self.next();
        let mut out = String::new();
        while let Some(c) = self.next() {
            match c {
                '\\' => match self.next() {
                    Some('n') => out.push('\n'),
                    Some(escaped) => out.push(escaped),
                    None => return Err(LineProtocolError::UnexpectedEnd("string field")),
                },
                '"' => return Ok(out),
                _ => out.push(c),
            }
        }
        Err(LineProtocolError::UnexpectedEnd("string field"))
    }
}
