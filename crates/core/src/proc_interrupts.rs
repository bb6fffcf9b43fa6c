// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! `/proc/interrupts` parsing and raw-IRQ to UIO index resolution.
//!
//! The kernel registers UIO interrupt lines under a common name (`fabric`)
//! in ascending IRQ order, which is also their order in `/proc/interrupts`.
//! The rank of a raw IRQ among those lines is therefore the minor number of
//! its `/dev/uioN` node.

use std::io;
use std::path::Path;

/// One interrupt row of `/proc/interrupts`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IrqLine {
    /// Leading Linux interrupt token (`48`, `IPI1`, `Err`).
    pub virq: String,
    /// Per-CPU counts.
    pub counts: Vec<u64>,
    pub chip: Option<String>,
    /// Hardware interrupt number inside `chip`.
    pub hwirq: Option<u32>,
    pub trigger: Option<String>,
    /// Registered action names; shared lines list several.
    pub names: Vec<String>,
}

impl IrqLine {
    /// Name used for matching. Only the first action of a shared line counts.
    pub fn primary_name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (head, rest) = line.split_once(':')?;
        let virq = head.trim();
        if virq.is_empty() || virq.contains(char::is_whitespace) {
            return None;
        }

        let tokens: Vec<&str> = rest.split_whitespace().collect();
        let n_counts = tokens
            .iter()
            .take_while(|t| t.parse::<u64>().is_ok())
            .count();
        let counts = tokens[..n_counts]
            .iter()
            .filter_map(|t| t.parse().ok())
            .collect();
        let tail = &tokens[n_counts..];

        let mut parsed = IrqLine {
            virq: virq.to_string(),
            counts,
            chip: None,
            hwirq: None,
            trigger: None,
            names: Vec::new(),
        };

        // `<chip> <hwirq> <trigger> <names...>`, or the x86 style
        // `<chip> <hwirq>-<trigger> <names...>`.
        let described = match tail {
            [chip, hwirq, rest @ ..] => match hwirq.parse::<u32>() {
                Ok(n) => {
                    parsed.chip = Some(chip.to_string());
                    parsed.hwirq = Some(n);
                    match rest.split_first() {
                        Some((trigger, names)) => {
                            parsed.trigger = Some(trigger.to_string());
                            Some(names)
                        }
                        None => Some(rest),
                    }
                }
                Err(_) => match hwirq.split_once('-') {
                    Some((n, trigger)) if n.parse::<u32>().is_ok() => {
                        parsed.chip = Some(chip.to_string());
                        parsed.hwirq = n.parse().ok();
                        parsed.trigger = Some(trigger.to_string());
                        Some(rest)
                    }
                    _ => None,
                },
            },
            _ => None,
        };

        match described {
            Some(names) => {
                parsed.names = names
                    .join(" ")
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            // IPI and error rows: free-text description, no hardware number.
            None if !tail.is_empty() => parsed.names = vec![tail.join(" ")],
            None => {}
        }
        Some(parsed)
    }
}

/// Parsed `/proc/interrupts`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcInterrupts {
    lines: Vec<IrqLine>,
}

impl ProcInterrupts {
    /// Column-count agnostic: the CPU header row and rows without a leading
    /// `<irq>:` token are skipped.
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().filter_map(IrqLine::parse).collect(),
        }
    }

    pub fn read(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    pub fn lines(&self) -> &[IrqLine] {
        &self.lines
    }

    /// Rows whose first registered name is exactly `name`, in file order.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a IrqLine> + 'a {
        self.lines
            .iter()
            .filter(move |line| line.primary_name() == Some(name))
    }

    /// UIO minor number of `raw_irq`: its rank among rows named `name`.
    pub fn uio_index(&self, raw_irq: u32, name: &str) -> Option<usize> {
        self.named(name)
            .position(|line| line.hwirq == Some(raw_irq))
    }
}
