//! The port-mapped I/O controller. Devices attach to one of the 128
//! ports; each registered port carries an input FIFO (drained by `IN`)
//! and an optional output handler (invoked by `OUT`).

use crate::spec::arch::{Word, IO_PORTS};
use std::collections::VecDeque;
use std::fmt;

pub type OutputHandler = Box<dyn FnMut(Word)>;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    PortOutOfRange(u64),
    PortInUse(u64),
    PortNotRegistered(u64),
    InputExhausted(u64),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PortOutOfRange(port) => write!(f, "I/O port {} out of range", port),
            Error::PortInUse(port) => write!(f, "I/O port {} already registered", port),
            Error::PortNotRegistered(port) => write!(f, "I/O port {} not registered", port),
            Error::InputExhausted(port) => {
                write!(f, "I/O port {} has no buffered input", port)
            }
        }
    }
}

struct Port {
    handler: Option<OutputHandler>,
    input: VecDeque<Word>,
}

pub struct Ioc {
    ports: Vec<Option<Port>>,
}

impl Ioc {
    pub fn new() -> Ioc {
        Ioc {
            ports: (0..IO_PORTS).map(|_| None).collect(),
        }
    }

    fn slot(&mut self, port: u64) -> Result<&mut Option<Port>, Error> {
        self.ports
            .get_mut(port as usize)
            .ok_or(Error::PortOutOfRange(port))
    }

    pub fn is_registered(&self, port: u64) -> bool {
        matches!(self.ports.get(port as usize), Some(Some(_)))
    }

    pub fn register(&mut self, port: u64, handler: Option<OutputHandler>) -> Result<(), Error> {
        let slot = self.slot(port)?;
        if slot.is_some() {
            return Err(Error::PortInUse(port));
        }

        *slot = Some(Port {
            handler,
            input: VecDeque::new(),
        });
        Ok(())
    }

    pub fn push_input(&mut self, port: u64, value: Word) -> Result<(), Error> {
        match self.slot(port)? {
            Some(p) => {
                p.input.push_back(value);
                Ok(())
            }
            None => Err(Error::PortNotRegistered(port)),
        }
    }

    /// Pop the next buffered word for `IN`. An unregistered port or an
    /// empty FIFO both fail; the machine raises an I/O exception.
    pub fn pop_input(&mut self, port: u64) -> Result<Word, Error> {
        match self.slot(port)? {
            Some(p) => p.input.pop_front().ok_or(Error::InputExhausted(port)),
            None => Err(Error::PortNotRegistered(port)),
        }
    }

    /// Deliver a word written by `OUT`. Writing to an unregistered port
    /// fails; the machine raises a general protection fault.
    pub fn write(&mut self, port: u64, value: Word) -> Result<(), Error> {
        match self.slot(port)? {
            Some(p) => {
                if let Some(handler) = p.handler.as_mut() {
                    handler(value);
                }
                Ok(())
            }
            None => Err(Error::PortNotRegistered(port)),
        }
    }

    /// Drop all buffered input, keeping registrations and handlers.
    pub fn clear_input(&mut self) {
        for port in self.ports.iter_mut().flatten() {
            port.input.clear();
        }
    }
}

impl fmt::Debug for Ioc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<usize> = self
            .ports
            .iter()
            .enumerate()
            .filter_map(|(n, p)| p.as_ref().map(|_| n))
            .collect();
        f.debug_struct("Ioc").field("registered", &registered).finish()
    }
}
