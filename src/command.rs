use bytes::Bytes;

use crate::error::CommandError;

/// A fully parsed client command, ready for `dispatch::execute` (§4.6). The
/// dispatcher — not this module — decides which variants are "writes to
/// propagate"; parsing only validates arity and argument shape.
#[derive(Debug, Clone)]
pub enum Command {
    Ping,
    Echo(Bytes),
    Get(Bytes),
    Set { key: Bytes, value: Bytes, px: Option<u64> },
    Incr(Bytes),
    Type(Bytes),
    LPush(Bytes, Vec<Bytes>),
    RPush(Bytes, Vec<Bytes>),
    LLen(Bytes),
    LRange(Bytes, i64, i64),
    LPop(Bytes, Option<usize>),
    BLPop(Bytes, f64),
    Keys(Bytes),
    ConfigGet(String),
    InfoReplication,
    ReplConf(Vec<Bytes>),
    Psync(Vec<Bytes>),
    Multi,
    Exec,
    Discard,
}

fn ascii_upper(b: &Bytes) -> String {
    String::from_utf8_lossy(b).to_ascii_uppercase()
}

fn parse_i64(b: &Bytes) -> Result<i64, CommandError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(CommandError::NotAnInteger)
}

fn parse_u64(b: &Bytes) -> Result<u64, CommandError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or(CommandError::Syntax)
}

fn parse_f64(b: &Bytes) -> Result<f64, CommandError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or(CommandError::Syntax)
}

/// Parses a decoded RESP array of bulk strings into a `Command`. The command
/// name is matched case-insensitively (§6); everything else is an opaque
/// byte string unless the grammar says otherwise.
pub fn parse(args: Vec<Bytes>) -> Result<Command, CommandError> {
    let Some(name) = args.first() else {
        return Err(CommandError::Other("empty command".into()));
    };
    let name = ascii_upper(name);
    let rest = &args[1..];

    match name.as_str() {
        "PING" => Ok(Command::Ping),
        "ECHO" => {
            require_arity(rest, 1, "echo")?;
            Ok(Command::Echo(rest[0].clone()))
        }
        "GET" => {
            require_arity(rest, 1, "get")?;
            Ok(Command::Get(rest[0].clone()))
        }
        "SET" => parse_set(rest),
        "INCR" => {
            require_arity(rest, 1, "incr")?;
            Ok(Command::Incr(rest[0].clone()))
        }
        "TYPE" => {
            require_arity(rest, 1, "type")?;
            Ok(Command::Type(rest[0].clone()))
        }
        "LPUSH" => parse_push(rest, "lpush").map(|(k, v)| Command::LPush(k, v)),
        "RPUSH" => parse_push(rest, "rpush").map(|(k, v)| Command::RPush(k, v)),
        "LLEN" => {
            require_arity(rest, 1, "llen")?;
            Ok(Command::LLen(rest[0].clone()))
        }
        "LRANGE" => {
            require_arity(rest, 3, "lrange")?;
            Ok(Command::LRange(rest[0].clone(), parse_i64(&rest[1])?, parse_i64(&rest[2])?))
        }
        "LPOP" => parse_lpop(rest),
        "BLPOP" => {
            require_arity(rest, 2, "blpop")?;
            Ok(Command::BLPop(rest[0].clone(), parse_f64(&rest[1])?))
        }
        "KEYS" => {
            require_arity(rest, 1, "keys")?;
            Ok(Command::Keys(rest[0].clone()))
        }
        "CONFIG" => parse_config(rest),
        "INFO" => Ok(Command::InfoReplication),
        "REPLCONF" => Ok(Command::ReplConf(rest.to_vec())),
        "PSYNC" => Ok(Command::Psync(rest.to_vec())),
        "MULTI" => Ok(Command::Multi),
        "EXEC" => Ok(Command::Exec),
        "DISCARD" => Ok(Command::Discard),
        other => Err(CommandError::UnknownCommand(other.to_string())),
    }
}

fn require_arity(rest: &[Bytes], expected: usize, name: &str) -> Result<(), CommandError> {
    if rest.len() != expected {
        Err(CommandError::WrongArity(name.to_string()))
    } else {
        Ok(())
    }
}

fn parse_set(rest: &[Bytes]) -> Result<Command, CommandError> {
    if rest.len() < 2 {
        return Err(CommandError::WrongArity("set".to_string()));
    }
    let key = rest[0].clone();
    let value = rest[1].clone();
    let mut px = None;

    let mut i = 2;
    while i < rest.len() {
        match ascii_upper(&rest[i]).as_str() {
            "PX" => {
                let arg = rest.get(i + 1).ok_or(CommandError::Syntax)?;
                px = Some(parse_u64(arg)?);
                i += 2;
            }
            _ => return Err(CommandError::Syntax),
        }
    }
    Ok(Command::Set { key, value, px })
}

fn parse_push(rest: &[Bytes], name: &str) -> Result<(Bytes, Vec<Bytes>), CommandError> {
    if rest.len() < 2 {
        return Err(CommandError::WrongArity(name.to_string()));
    }
    Ok((rest[0].clone(), rest[1..].to_vec()))
}

fn parse_lpop(rest: &[Bytes]) -> Result<Command, CommandError> {
    match rest.len() {
        1 => Ok(Command::LPop(rest[0].clone(), None)),
        2 => {
            let count = parse_i64(&rest[1])?;
            if count < 0 {
                return Err(CommandError::Other("value is out of range, must be positive".into()));
            }
            Ok(Command::LPop(rest[0].clone(), Some(count as usize)))
        }
        _ => Err(CommandError::WrongArity("lpop".to_string())),
    }
}

fn parse_config(rest: &[Bytes]) -> Result<Command, CommandError> {
    if rest.len() != 2 || ascii_upper(&rest[0]) != "GET" {
        return Err(CommandError::Syntax);
    }
    Ok(Command::ConfigGet(String::from_utf8_lossy(&rest[1]).to_lowercase()))
}

/// Commands whose successful local application must be fanned out verbatim
/// to attached replicas (§4.5, §4.6).
pub fn is_write(cmd: &Command) -> bool {
    matches!(
        cmd,
        Command::Set { .. } | Command::LPush(..) | Command::RPush(..) | Command::Incr(..)
    )
}
