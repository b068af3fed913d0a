//! Custom Resource Definitions for Carrier
//!
//! This module contains the carrier.ocgi.dev resources the webhook admits.
//! The CRDs themselves are installed by the carrier controller, so schema
//! generation is disabled.

mod gameserver;
mod gameserverset;
mod squad;
mod types;

pub use gameserver::{GameServer, GameServerSpec};
pub use gameserverset::{GameServerSet, GameServerSetSpec};
pub use squad::{RollingUpdateSquad, Squad, SquadSpec, SquadStrategy, SquadStrategyType};
pub use types::{GameServerPort, GameServerTemplateSpec, PortPolicy, PortRange, SchedulingStrategy};
