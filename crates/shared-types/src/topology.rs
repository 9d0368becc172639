//! # Well-Known Topology
//!
//! Names of every exchange, queue, routing pattern, stream topic and command
//! pattern used between the services.
//!
//! ```text
//!  gateway ──rpc(services, <pattern>)──► services exchange ──► <svc>.events queue
//!                                                                   │
//!  monitor ◄──consume(vm-metrics)── stream ◄──publish── agents      │
//!     │                                                             ▼
//!     └──publish(alerts, alert.critical)──► alerts exchange    command router
//! ```

/// Bus exchanges. All cross-service exchanges are `topic` exchanges.
pub mod exchanges {
    pub const SERVICES: &str = "services";
    pub const MONITORING: &str = "monitoring";
    pub const EVENTS: &str = "events";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const ALERTS: &str = "alerts";

    pub const ALL: [&str; 5] = [SERVICES, MONITORING, EVENTS, NOTIFICATIONS, ALERTS];
}

/// Bus queues.
pub mod queues {
    pub const AUTH_EVENTS: &str = "auth.events";
    pub const USER_CREATED: &str = "user.created";
    pub const USER_UPDATED: &str = "user.updated";

    pub const INFRASTRUCTURE_EVENTS: &str = "infrastructure.events";
    pub const RESOURCE_GROUP_CREATED: &str = "resource-group.created";
    pub const VM_CREATED: &str = "vm.created";
    pub const VM_STATUS_CHANGED: &str = "vm.status.changed";

    pub const AGENTS_EVENTS: &str = "agents.events";
    pub const AGENT_DEPLOYED: &str = "agent.deployed";
    pub const AGENT_STATUS: &str = "agent.status";
    pub const TASK_COMPLETED: &str = "task.completed";

    pub const MONITOR_EVENTS: &str = "monitor.events";
    pub const METRICS_COLLECTED: &str = "metrics.collected";
    pub const ALERT_TRIGGERED: &str = "alert.triggered";
}

/// Binding patterns.
pub mod routing {
    pub const AUTH: &str = "auth.*";
    pub const INFRASTRUCTURE: &str = "infrastructure.*";
    pub const INFRA_COMMANDS: &str = "infra.*";
    pub const AGENTS: &str = "agents.*";
    pub const MONITORING: &str = "monitoring.*";
    pub const MONITOR_COMMANDS: &str = "monitor.*";
    pub const ALERTS: &str = "alert.#";
    pub const ALL: &str = "#";

    /// Routing key for script deployment events.
    pub const AGENTS_DEPLOY_SCRIPTS: &str = "agents.deploy_scripts";
    /// Routing key for VM status changes.
    pub const INFRASTRUCTURE_VM_STATUS: &str = "infrastructure.vm.status";
    /// Routing key the monitor publishes alert events with.
    pub const ALERT_CRITICAL: &str = "alert.critical";
}

/// Stream topics and their partition defaults.
pub mod topics {
    pub const VM_METRICS: &str = "vm-metrics";
    pub const VM_METRICS_PROCESSED: &str = "vm-metrics-processed";
    pub const ALERTS: &str = "alerts";
    pub const LOGS: &str = "logs";
    pub const SYSTEM_HEALTH: &str = "system-health";

    pub const DEFAULT_PARTITIONS: u32 = 3;
    pub const VM_METRICS_PARTITIONS: u32 = 6;
    pub const ALERTS_PARTITIONS: u32 = 1;

    /// Partition count a topic is provisioned with.
    pub fn partitions_for(topic: &str) -> u32 {
        match topic {
            VM_METRICS => VM_METRICS_PARTITIONS,
            ALERTS => ALERTS_PARTITIONS,
            _ => DEFAULT_PARTITIONS,
        }
    }
}

/// Stream consumer groups.
pub mod consumer_groups {
    pub const MONITOR_SERVICE: &str = "monitor-service-group";
    pub const ANALYTICS: &str = "analytics-group";
    pub const ALERTING: &str = "alerting-group";
}

/// Command patterns (bus routing keys for request/reply calls).
pub mod patterns {
    pub mod auth {
        pub const LOGIN: &str = "auth.login";
        pub const SIGNUP: &str = "auth.signup";
        pub const VALIDATE_TOKEN: &str = "auth.validate_token";
        pub const GET_USER: &str = "auth.get_user";
        pub const CHECK_PERMISSION: &str = "auth.check_permission";
    }

    pub mod infrastructure {
        pub const CREATE_RESOURCE_GROUP: &str = "infra.create_resource_group";
        pub const GET_RESOURCE_GROUPS: &str = "infra.get_resource_groups";
        pub const GET_RESOURCE_GROUP: &str = "infra.get_resource_group";
        pub const UPDATE_RESOURCE_GROUP: &str = "infra.update_resource_group";
        pub const DELETE_RESOURCE_GROUP: &str = "infra.delete_resource_group";
        pub const CREATE_VM: &str = "infra.create_vm";
        pub const GET_VMS: &str = "infra.get_vms";
        pub const GET_VM: &str = "infra.get_vm";
        pub const UPDATE_VM: &str = "infra.update_vm";
        pub const DELETE_VM: &str = "infra.delete_vm";
        pub const EXECUTE_COMMAND: &str = "infra.execute_command";
        pub const CREATE_VIRTUAL_NETWORK: &str = "infra.create_virtual_network";
        pub const GET_VIRTUAL_NETWORKS: &str = "infra.get_virtual_networks";
        pub const UPDATE_VIRTUAL_NETWORK: &str = "infra.update_virtual_network";
        pub const DELETE_VIRTUAL_NETWORK: &str = "infra.delete_virtual_network";
        pub const VM_CONNECTIVITY_UPDATE: &str = "infra.vm_connectivity_update";
    }

    pub mod agents {
        pub const DEPLOY_AGENT: &str = "agents.deploy";
        pub const GET_AGENTS: &str = "agents.get_all";
        pub const GET_AGENT: &str = "agents.get";
        pub const CREATE_TASK: &str = "agents.create_task";
        pub const GET_TASKS: &str = "agents.get_tasks";
        pub const GET_AGENT_STATUS: &str = "agents.get_status";
    }

    pub mod monitor {
        pub const GET_HEALTH: &str = "monitor.get_health";
        pub const GET_VM_METRICS: &str = "monitor.get_vm_metrics";
        pub const GET_RESOURCE_GROUP_STATS: &str = "monitor.get_rg_stats";
        pub const RECORD_METRIC: &str = "monitor.record_metric";
        pub const GET_DASHBOARD: &str = "monitor.get_dashboard";
        pub const GET_ALERTS: &str = "monitor.get_alerts";
        pub const GET_AGGREGATION: &str = "monitor.get_aggregation";
        pub const GET_MACHINES: &str = "monitor.get_machines";
        pub const GET_HEALTH_REPORT: &str = "monitor.get_health_report";
        pub const GET_PROMETHEUS: &str = "monitor.get_prometheus";
    }
}
