//! Per-listener session tuning.

use std::fmt;
use std::rc::Rc;

use rill_core::ValueCodec;
use serde::{Deserialize, Serialize};

use crate::event::CloseReason;

/// Framing and flow-control options applied to every session a listener
/// or dialer creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Deliver inbound chunks as binary blocks instead of text.
    #[serde(default)]
    pub binary: bool,
    /// Pause the receive side once this many inbound bytes sit unconsumed.
    #[serde(default = "default_high_watermark")]
    pub high_watermark: usize,
    /// Resume receiving once consumption drains the inbound buffer to this
    /// many bytes or fewer. Expected to be below the high mark.
    #[serde(default = "default_low_watermark")]
    pub low_watermark: usize,
}

fn default_high_watermark() -> usize {
    64 * 1024
}

fn default_low_watermark() -> usize {
    16 * 1024
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            binary: false,
            high_watermark: default_high_watermark(),
            low_watermark: default_low_watermark(),
        }
    }
}

impl SessionConfig {
    /// Codec matching the configured framing.
    pub fn codec(&self) -> ValueCodec {
        if self.binary {
            ValueCodec::Binary
        } else {
            ValueCodec::Text
        }
    }
}

/// Lifecycle callbacks fired as a session transitions.
///
/// Data delivery is not a hook; consume the incoming stream for that.
/// Hooks run on the bridge thread after the session has finished updating
/// its own state, so calling back into the session from one is safe.
#[derive(Clone, Default)]
pub struct SessionHooks {
    pub(crate) connect: Option<Rc<dyn Fn()>>,
    pub(crate) close: Option<Rc<dyn Fn(&CloseReason)>>,
    pub(crate) error: Option<Rc<dyn Fn(&str)>>,
}

impl SessionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` once the transport reports the connection established.
    #[must_use]
    pub fn on_connect(mut self, hook: impl Fn() + 'static) -> Self {
        self.connect = Some(Rc::new(hook));
        self
    }

    /// Run `hook` when the connection ends, with the wire's close reason.
    #[must_use]
    pub fn on_close(mut self, hook: impl Fn(&CloseReason) + 'static) -> Self {
        self.close = Some(Rc::new(hook));
        self
    }

    /// Run `hook` when the transport fails outright.
    #[must_use]
    pub fn on_error(mut self, hook: impl Fn(&str) + 'static) -> Self {
        self.error = Some(Rc::new(hook));
        self
    }
}

impl fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHooks")
            .field("connect", &self.connect.is_some())
            .field("close", &self.close.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}
