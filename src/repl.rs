//! Line-oriented shell for the scan → filter → narrow loop.

use std::io::{self, Write};

use anyhow::Result;
use owo_colors::OwoColorize;

use libmemsift::{ScanDescriptor, Session, TypeSet, TypeTag, Value};

pub struct Repl {
    session: Session,
    types: TypeSet,
    step: usize,
}

impl Repl {
    pub fn new(session: Session, types: TypeSet, step: usize) -> Self {
        let types = if types.is_empty() {
            TypeSet::I32
        } else {
            types
        };
        Repl {
            session,
            types,
            step,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        println!(
            "{} scanning as {:?}; type 'help' for commands",
            "[info]".bright_cyan(),
            self.types
        );

        loop {
            print!("{} ", ">".bright_yellow().bold());
            io::stdout().flush()?;

            let mut line = String::new();
            if io::stdin().read_line(&mut line)? == 0 {
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match self.dispatch(line) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => println!("{} {e}", "[error]".bright_red()),
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, line: &str) -> Result<bool> {
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };

        match command {
            "help" => {
                println!("  scan <expr>      new scan, e.g. scan = 100");
                println!("  filter <expr>    narrow matches, e.g. filter >, filter = 99");
                println!("  list [n]         show up to n matches (default 20)");
                println!("  update           re-read every match's value");
                println!("  write <i> <v>    write value v to match i");
                println!("  count            number of matches");
                println!("  reset            drop all matches");
                println!("  quit             leave");
            }
            "scan" => {
                anyhow::ensure!(!rest.is_empty(), "usage: scan <expr>");
                let descriptor =
                    ScanDescriptor::new(rest, self.types).with_step(self.step);
                let added = self.session.scan(&descriptor)?;
                println!(
                    "{} {} matches ({} total)",
                    "[done]".bright_cyan(),
                    added.to_string().bright_green(),
                    self.session.len()
                );
            }
            "filter" => {
                anyhow::ensure!(!rest.is_empty(), "usage: filter <expr>");
                let left = self.session.filter(rest)?;
                println!(
                    "{} {} matches remain",
                    "[done]".bright_cyan(),
                    left.to_string().bright_green()
                );
            }
            "list" => {
                let limit = rest.parse::<usize>().unwrap_or(20);
                for (i, m) in self.session.matches().take(limit).enumerate() {
                    println!(
                        "{i:4}  {}  {:012x} {}: {}",
                        "[match]".bright_green(),
                        m.addr,
                        m.tag().to_string().green(),
                        m.value
                    );
                }
                if self.session.len() > limit {
                    println!(
                        "{} {} more not shown",
                        "[info]".bright_cyan(),
                        self.session.len() - limit
                    );
                }
            }
            "update" => {
                self.session.update_all()?;
                println!("{} values refreshed", "[done]".bright_cyan());
            }
            "write" => {
                let (index, literal) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| anyhow::anyhow!("usage: write <index> <value>"))?;
                let index: usize = index.parse()?;
                let m = self
                    .session
                    .at(index)
                    .ok_or_else(|| anyhow::anyhow!("no match #{index}"))?;
                let value = parse_value(m.tag(), literal.trim())?;
                let addr = m.addr;
                self.session.write(addr, &value)?;
                self.session.update_all()?;
                println!("{} wrote {} to {:012x}", "[done]".bright_cyan(), value, addr);
            }
            "count" => println!("{}", self.session.len()),
            "reset" => {
                self.session.reset();
                println!("{} match set cleared", "[done]".bright_cyan());
            }
            "quit" | "exit" | "q" => return Ok(false),
            other => anyhow::bail!("unknown command '{other}', try 'help'"),
        }
        Ok(true)
    }
}

fn parse_value(tag: TypeTag, literal: &str) -> Result<Value> {
    fn int(literal: &str) -> Result<i64> {
        let parsed = if let Some(hex) = literal.strip_prefix("0x") {
            i64::from_str_radix(hex, 16)?
        } else if let Some(hex) = literal.strip_prefix("-0x") {
            -i64::from_str_radix(hex, 16)?
        } else {
            literal.parse::<i64>()?
        };
        Ok(parsed)
    }

    Ok(match tag {
        TypeTag::U8 => Value::U8(int(literal)? as u8),
        TypeTag::U16 => Value::U16(int(literal)? as u16),
        TypeTag::U32 => Value::U32(int(literal)? as u32),
        TypeTag::U64 => Value::U64(int(literal)? as u64),
        TypeTag::I8 => Value::I8(int(literal)? as i8),
        TypeTag::I16 => Value::I16(int(literal)? as i16),
        TypeTag::I32 => Value::I32(int(literal)? as i32),
        TypeTag::I64 => Value::I64(int(literal)?),
        TypeTag::F32 => Value::F32(literal.parse()?),
        TypeTag::F64 => Value::F64(literal.parse()?),
        TypeTag::Bytes => anyhow::bail!("cannot write byte-string matches from the shell"),
    })
}
