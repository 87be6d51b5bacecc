use super::*;
use crate::bus::events::{BusEvent, QueueEventKind};
use crate::bus::handler::{ErrorDetail, HandlerContext, MessageHandler, MessageHandlerResult};
use crate::error::HandlerFailure;
use std::collections::HashMap;

mod common;
use common::*;
