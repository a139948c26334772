//! Internal command and indication identifiers.
//!
//! One id space is shared by requests and indications. The id routes a
//! request to the engine and correlates its reply back to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether an id names a request sent to the engine or an unsolicited
/// indication sent by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Request,
    Indication,
}

/// An internal protocol event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u16);

impl EventId {
    // SYS
    pub const SYS_RESET_REQ: EventId = EventId(0x00);
    pub const SYS_VERSION_REQ: EventId = EventId(0x02);
    pub const SYS_CONFIG_READ_REQ: EventId = EventId(0x03);
    pub const SYS_CONFIG_WRITE_REQ: EventId = EventId(0x04);
    pub const SYS_OTA_MSG_REQ: EventId = EventId(0x06);
    pub const SYS_SET_TX_POWER_REQ: EventId = EventId(0x07);
    pub const SYS_NWK_INFO_READ_REQ: EventId = EventId(0x08);

    // DEV
    pub const DEV_START_REQ: EventId = EventId(0x10);
    pub const DEV_NWK_DISCOVERY_REQ: EventId = EventId(0x11);
    pub const DEV_JOIN_REQ: EventId = EventId(0x12);
    pub const DEV_ZDO_CBS_REQ: EventId = EventId(0x14);

    // AF
    pub const AF_REGISTER_REQ: EventId = EventId(0x20);
    pub const AF_UNREGISTER_REQ: EventId = EventId(0x21);
    pub const AF_DATA_REQ: EventId = EventId(0x22);

    // ZDO requests
    pub const ZDO_NODE_DESC_REQ: EventId = EventId(0x28);
    pub const ZDO_POWER_DESC_REQ: EventId = EventId(0x29);
    pub const ZDO_SIMPLE_DESC_REQ: EventId = EventId(0x2A);
    pub const ZDO_ACTIVE_ENDPOINT_REQ: EventId = EventId(0x2B);
    pub const ZDO_MATCH_DESC_REQ: EventId = EventId(0x2C);
    pub const ZDO_MGMT_PERMIT_JOIN_REQ: EventId = EventId(0x43);
    pub const ZDO_USER_DESC_REQ: EventId = EventId(0x47);
    pub const ZDO_NWK_ADDR_REQ: EventId = EventId(0x4C);
    pub const ZDO_IEEE_ADDR_REQ: EventId = EventId(0x4D);

    // ZDO indications
    pub const ZDO_DEVICE_ANNOUNCE: EventId = EventId(0x48);
    pub const ZDO_NWK_ADDR_RSP: EventId = EventId(0x60);
    pub const ZDO_IEEE_ADDR_RSP: EventId = EventId(0x61);
    pub const ZDO_NODE_DESC_RSP: EventId = EventId(0x62);
    pub const ZDO_POWER_DESC_RSP: EventId = EventId(0x63);
    pub const ZDO_SIMPLE_DESC_RSP: EventId = EventId(0x64);
    pub const ZDO_ACTIVE_EP_RSP: EventId = EventId(0x65);
    pub const ZDO_MATCH_DESC_RSP: EventId = EventId(0x66);
    pub const ZDO_USER_DESC_RSP: EventId = EventId(0x68);
    pub const ZDO_SERVER_DISC_RSP: EventId = EventId(0x6A);
    pub const ZDO_END_DEVICE_BIND_RSP: EventId = EventId(0x6B);
    pub const ZDO_BIND_RSP: EventId = EventId(0x6C);
    pub const ZDO_UNBIND_RSP: EventId = EventId(0x6D);
    pub const ZDO_MGMT_NWK_DISC_RSP: EventId = EventId(0x6E);
    pub const ZDO_MGMT_LQI_RSP: EventId = EventId(0x6F);
    pub const ZDO_MGMT_RTG_RSP: EventId = EventId(0x70);
    pub const ZDO_MGMT_BIND_RSP: EventId = EventId(0x71);
    pub const ZDO_MGMT_LEAVE_RSP: EventId = EventId(0x72);
    pub const ZDO_MGMT_DIRECT_JOIN_RSP: EventId = EventId(0x73);
    pub const ZDO_MGMT_PERMIT_JOIN_RSP: EventId = EventId(0x74);
    pub const ZDO_MGMT_NWK_UPDATE_NOTIFY: EventId = EventId(0x75);
    pub const ZDO_SRC_RTG_IND: EventId = EventId(0x76);
    pub const ZDO_CONCENTRATOR_IND: EventId = EventId(0x77);
    pub const ZDO_NWK_DISC_CNF: EventId = EventId(0x78);
    pub const ZDO_BEACON_NOTIFY_IND: EventId = EventId(0x79);
    pub const ZDO_JOIN_CNF: EventId = EventId(0x7A);
    pub const ZDO_LEAVE_CNF: EventId = EventId(0x7B);
    pub const ZDO_LEAVE_IND: EventId = EventId(0x7C);

    // Stack indications
    pub const SYS_RESET_IND: EventId = EventId(0x90);
    pub const AF_DATA_CONFIRM_IND: EventId = EventId(0x91);
    pub const AF_INCOMING_MSG_IND: EventId = EventId(0x92);
    pub const AF_REFLECT_ERROR_IND: EventId = EventId(0x93);
    pub const DEV_STATE_CHANGE_IND: EventId = EventId(0x94);
    pub const ZDO_TC_DEVICE_IND: EventId = EventId(0x95);
    pub const DEV_PERMIT_JOIN_IND: EventId = EventId(0x96);

    // BDB
    pub const BDB_NOTIFICATION: EventId = EventId(0xC5);
    pub const BDB_IDENTIFY_TIME_CB: EventId = EventId(0xC6);
    pub const BDB_BIND_NOTIFICATION_CB: EventId = EventId(0xC7);
    pub const BDB_TC_LINK_KEY_EXCHANGE_NOTIFICATION_IND: EventId = EventId(0xC8);
    pub const BDB_TOUCHLINK_TARGET_ENABLE_IND: EventId = EventId(0xC9);
    pub const BDB_CBKE_TC_LINK_KEY_EXCHANGE_IND: EventId = EventId(0xCA);
    pub const BDB_FILTER_NWK_DESCRIPTOR_IND: EventId = EventId(0xCB);

    // Green Power
    pub const GP_COMMISSIONING_MODE_IND: EventId = EventId(0xE0);
    pub const GP_DATA_IND: EventId = EventId(0xE2);
    pub const GP_SECURITY_REQ: EventId = EventId(0xE3);

    pub const PAUSE_DEVICE_REQ: EventId = EventId(0xEB);

    pub fn value(self) -> u16 {
        self.0
    }

    /// Canonical name, if the id is one this crate knows.
    pub fn name(self) -> Option<&'static str> {
        KNOWN.iter().find(|(id, _, _)| *id == self).map(|(_, n, _)| *n)
    }

    /// Request or indication, if the id is one this crate knows.
    pub fn kind(self) -> Option<EventKind> {
        KNOWN.iter().find(|(id, _, _)| *id == self).map(|(_, _, k)| *k)
    }

    pub fn is_indication(self) -> bool {
        self.kind() == Some(EventKind::Indication)
    }
}

use EventKind::{Indication as Ind, Request as Req};

const KNOWN: &[(EventId, &str, EventKind)] = &[
    (EventId::SYS_RESET_REQ, "SYS_RESET_REQ", Req),
    (EventId::SYS_VERSION_REQ, "SYS_VERSION_REQ", Req),
    (EventId::SYS_CONFIG_READ_REQ, "SYS_CONFIG_READ_REQ", Req),
    (EventId::SYS_CONFIG_WRITE_REQ, "SYS_CONFIG_WRITE_REQ", Req),
    (EventId::SYS_OTA_MSG_REQ, "SYS_OTA_MSG_REQ", Ind),
    (EventId::SYS_SET_TX_POWER_REQ, "SYS_SET_TX_POWER_REQ", Req),
    (EventId::SYS_NWK_INFO_READ_REQ, "SYS_NWK_INFO_READ_REQ", Req),
    (EventId::DEV_START_REQ, "DEV_START_REQ", Req),
    (EventId::DEV_NWK_DISCOVERY_REQ, "DEV_NWK_DISCOVERY_REQ", Req),
    (EventId::DEV_JOIN_REQ, "DEV_JOIN_REQ", Req),
    (EventId::DEV_ZDO_CBS_REQ, "DEV_ZDO_CBS_REQ", Req),
    (EventId::AF_REGISTER_REQ, "AF_REGISTER_REQ", Req),
    (EventId::AF_UNREGISTER_REQ, "AF_UNREGISTER_REQ", Req),
    (EventId::AF_DATA_REQ, "AF_DATA_REQ", Req),
    (EventId::ZDO_NODE_DESC_REQ, "ZDO_NODE_DESC_REQ", Req),
    (EventId::ZDO_POWER_DESC_REQ, "ZDO_POWER_DESC_REQ", Req),
    (EventId::ZDO_SIMPLE_DESC_REQ, "ZDO_SIMPLE_DESC_REQ", Req),
    (EventId::ZDO_ACTIVE_ENDPOINT_REQ, "ZDO_ACTIVE_ENDPOINT_REQ", Req),
    (EventId::ZDO_MATCH_DESC_REQ, "ZDO_MATCH_DESC_REQ", Req),
    (EventId::ZDO_MGMT_PERMIT_JOIN_REQ, "ZDO_MGMT_PERMIT_JOIN_REQ", Req),
    (EventId::ZDO_USER_DESC_REQ, "ZDO_USER_DESC_REQ", Req),
    (EventId::ZDO_NWK_ADDR_REQ, "ZDO_NWK_ADDR_REQ", Req),
    (EventId::ZDO_IEEE_ADDR_REQ, "ZDO_IEEE_ADDR_REQ", Req),
    (EventId::ZDO_DEVICE_ANNOUNCE, "ZDO_DEVICE_ANNOUNCE", Ind),
    (EventId::ZDO_NWK_ADDR_RSP, "ZDO_NWK_ADDR_RSP", Ind),
    (EventId::ZDO_IEEE_ADDR_RSP, "ZDO_IEEE_ADDR_RSP", Ind),
    (EventId::ZDO_NODE_DESC_RSP, "ZDO_NODE_DESC_RSP", Ind),
    (EventId::ZDO_POWER_DESC_RSP, "ZDO_POWER_DESC_RSP", Ind),
    (EventId::ZDO_SIMPLE_DESC_RSP, "ZDO_SIMPLE_DESC_RSP", Ind),
    (EventId::ZDO_ACTIVE_EP_RSP, "ZDO_ACTIVE_EP_RSP", Ind),
    (EventId::ZDO_MATCH_DESC_RSP, "ZDO_MATCH_DESC_RSP", Ind),
    (EventId::ZDO_USER_DESC_RSP, "ZDO_USER_DESC_RSP", Ind),
    (EventId::ZDO_SERVER_DISC_RSP, "ZDO_SERVER_DISC_RSP", Ind),
    (EventId::ZDO_END_DEVICE_BIND_RSP, "ZDO_END_DEVICE_BIND_RSP", Ind),
    (EventId::ZDO_BIND_RSP, "ZDO_BIND_RSP", Ind),
    (EventId::ZDO_UNBIND_RSP, "ZDO_UNBIND_RSP", Ind),
    (EventId::ZDO_MGMT_NWK_DISC_RSP, "ZDO_MGMT_NWK_DISC_RSP", Ind),
    (EventId::ZDO_MGMT_LQI_RSP, "ZDO_MGMT_LQI_RSP", Ind),
    (EventId::ZDO_MGMT_RTG_RSP, "ZDO_MGMT_RTG_RSP", Ind),
    (EventId::ZDO_MGMT_BIND_RSP, "ZDO_MGMT_BIND_RSP", Ind),
    (EventId::ZDO_MGMT_LEAVE_RSP, "ZDO_MGMT_LEAVE_RSP", Ind),
    (EventId::ZDO_MGMT_DIRECT_JOIN_RSP, "ZDO_MGMT_DIRECT_JOIN_RSP", Ind),
    (EventId::ZDO_MGMT_PERMIT_JOIN_RSP, "ZDO_MGMT_PERMIT_JOIN_RSP", Ind),
    (EventId::ZDO_MGMT_NWK_UPDATE_NOTIFY, "ZDO_MGMT_NWK_UPDATE_NOTIFY", Ind),
    (EventId::ZDO_SRC_RTG_IND, "ZDO_SRC_RTG_IND", Ind),
    (EventId::ZDO_CONCENTRATOR_IND, "ZDO_CONCENTRATOR_IND", Ind),
    (EventId::ZDO_NWK_DISC_CNF, "ZDO_NWK_DISC_CNF", Ind),
    (EventId::ZDO_BEACON_NOTIFY_IND, "ZDO_BEACON_NOTIFY_IND", Ind),
    (EventId::ZDO_JOIN_CNF, "ZDO_JOIN_CNF", Ind),
    (EventId::ZDO_LEAVE_CNF, "ZDO_LEAVE_CNF", Ind),
    (EventId::ZDO_LEAVE_IND, "ZDO_LEAVE_IND", Ind),
    (EventId::SYS_RESET_IND, "SYS_RESET_IND", Ind),
    (EventId::AF_DATA_CONFIRM_IND, "AF_DATA_CONFIRM_IND", Ind),
    (EventId::AF_INCOMING_MSG_IND, "AF_INCOMING_MSG_IND", Ind),
    (EventId::AF_REFLECT_ERROR_IND, "AF_REFLECT_ERROR_IND", Ind),
    (EventId::DEV_STATE_CHANGE_IND, "DEV_STATE_CHANGE_IND", Ind),
    (EventId::ZDO_TC_DEVICE_IND, "ZDO_TC_DEVICE_IND", Ind),
    (EventId::DEV_PERMIT_JOIN_IND, "DEV_PERMIT_JOIN_IND", Ind),
    (EventId::BDB_NOTIFICATION, "BDB_NOTIFICATION", Ind),
    (EventId::BDB_IDENTIFY_TIME_CB, "BDB_IDENTIFY_TIME_CB", Ind),
    (EventId::BDB_BIND_NOTIFICATION_CB, "BDB_BIND_NOTIFICATION_CB", Ind),
    (
        EventId::BDB_TC_LINK_KEY_EXCHANGE_NOTIFICATION_IND,
        "BDB_TC_LINK_KEY_EXCHANGE_NOTIFICATION_IND",
        Ind,
    ),
    (
        EventId::BDB_TOUCHLINK_TARGET_ENABLE_IND,
        "BDB_TOUCHLINK_TARGET_ENABLE_IND",
        Ind,
    ),
    (
        EventId::BDB_CBKE_TC_LINK_KEY_EXCHANGE_IND,
        "BDB_CBKE_TC_LINK_KEY_EXCHANGE_IND",
        Ind,
    ),
    (
        EventId::BDB_FILTER_NWK_DESCRIPTOR_IND,
        "BDB_FILTER_NWK_DESCRIPTOR_IND",
        Ind,
    ),
    (EventId::GP_COMMISSIONING_MODE_IND, "GP_COMMISSIONING_MODE_IND", Ind),
    (EventId::GP_DATA_IND, "GP_DATA_IND", Ind),
    (EventId::GP_SECURITY_REQ, "GP_SECURITY_REQ", Ind),
    (EventId::PAUSE_DEVICE_REQ, "PAUSE_DEVICE_REQ", Ind),
];

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "event {:#04x}", self.0),
        }
    }
}

impl From<u16> for EventId {
    fn from(value: u16) -> Self {
        EventId(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_ids_unique() {
        let mut seen = HashSet::new();
        for (id, name, _) in KNOWN {
            assert!(seen.insert(*id), "duplicate id for {}", name);
        }
    }

    #[test]
    fn test_kind() {
        assert_eq!(EventId::AF_DATA_REQ.kind(), Some(EventKind::Request));
        assert!(EventId::AF_INCOMING_MSG_IND.is_indication());
        // Device announce sits between request ids
        assert!(EventId::ZDO_DEVICE_ANNOUNCE.is_indication());
        assert!(!EventId::ZDO_NWK_ADDR_REQ.is_indication());
        assert_eq!(EventId(0xFD).kind(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(EventId::SYS_VERSION_REQ.to_string(), "SYS_VERSION_REQ");
        assert_eq!(EventId(0xFD).to_string(), "event 0xfd");
    }
}
