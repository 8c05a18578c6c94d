//! Conventional service names for well-known ports.
//!
//! Used to label a port with the service it is expected to run when the
//! port list in use doesn't say.

use std::collections::HashMap;
use std::sync::LazyLock;

const WELL_KNOWN: &[(u16, &str)] = &[
    (20, "FTP-Data"),
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (80, "HTTP"),
    (88, "Kerberos"),
    (110, "POP3"),
    (111, "RPCbind"),
    (119, "NNTP"),
    (135, "MSRPC"),
    (139, "NetBIOS"),
    (143, "IMAP"),
    (179, "BGP"),
    (389, "LDAP"),
    (443, "HTTPS"),
    (445, "SMB"),
    (465, "SMTPS"),
    (514, "Syslog"),
    (548, "AFP"),
    (554, "RTSP"),
    (587, "Submission"),
    (631, "IPP"),
    (636, "LDAPS"),
    (873, "rsync"),
    (993, "IMAPS"),
    (995, "POP3S"),
    (1080, "SOCKS"),
    (1194, "OpenVPN"),
    (1433, "MSSQL"),
    (1521, "Oracle"),
    (1723, "PPTP"),
    (1883, "MQTT"),
    (2049, "NFS"),
    (2181, "ZooKeeper"),
    (2375, "Docker"),
    (2376, "Docker TLS"),
    (3000, "Node.js Dev"),
    (3001, "Node.js Alt"),
    (3128, "Squid"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (3690, "SVN"),
    (4200, "Angular"),
    (4369, "EPMD"),
    (5000, "Flask"),
    (5060, "SIP"),
    (5061, "SIPS"),
    (5173, "Vite"),
    (5222, "XMPP"),
    (5432, "PostgreSQL"),
    (5672, "AMQP"),
    (5900, "VNC"),
    (5984, "CouchDB"),
    (6379, "Redis"),
    (6443, "Kubernetes API"),
    (6667, "IRC"),
    (8000, "HTTP-Alt"),
    (8008, "HTTP-Alt"),
    (8080, "HTTP-Proxy"),
    (8081, "HTTP-Alt"),
    (8086, "InfluxDB"),
    (8443, "HTTPS-Alt"),
    (8883, "MQTT TLS"),
    (8888, "Jupyter"),
    (9000, "SonarQube"),
    (9042, "Cassandra"),
    (9090, "Prometheus"),
    (9092, "Kafka"),
    (9200, "Elasticsearch"),
    (9229, "Node Inspector"),
    (9418, "Git"),
    (10000, "Webmin"),
    (11211, "Memcached"),
    (15672, "RabbitMQ Mgmt"),
    (27017, "MongoDB"),
];

static PORT_SERVICES: LazyLock<HashMap<u16, &'static str>> =
    LazyLock::new(|| WELL_KNOWN.iter().copied().collect());

/// Conventional service for `port`, if it has one.
pub fn service_name(port: u16) -> Option<&'static str> {
    PORT_SERVICES.get(&port).copied()
}
