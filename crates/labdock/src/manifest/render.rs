//! Compose file rendering. Credentials are exposed only here.

use secrecy::ExposeSecret;
use serde_yaml::{Mapping, Value};

use super::{EnvValue, HealthCheck, Manifest, Service, ServiceSource};

fn string(value: impl Into<String>) -> Value {
    Value::String(value.into())
}

fn list<'a>(items: impl IntoIterator<Item = &'a String>) -> Value {
    Value::Sequence(items.into_iter().map(|i| string(i.as_str())).collect())
}

fn pairs<'a>(items: impl IntoIterator<Item = (&'a str, String)>) -> Value {
    let mut map = Mapping::new();
    for (key, value) in items {
        map.insert(string(key), string(value));
    }
    Value::Mapping(map)
}

fn healthcheck(check: &HealthCheck) -> Value {
    let mut map = Mapping::new();
    map.insert(string("test"), list(&check.test));
    map.insert(string("interval"), string(check.interval.as_str()));
    map.insert(string("timeout"), string(check.timeout.as_str()));
    map.insert(string("retries"), Value::Number(check.retries.into()));
    map.insert(string("start_period"), string(check.start_period.as_str()));
    Value::Mapping(map)
}

fn service(service: &Service) -> Value {
    let mut map = Mapping::new();
    map.insert(string("container_name"), string(service.container_name.as_str()));

    match &service.source {
        ServiceSource::Image(image) => {
            map.insert(string("image"), string(image.as_str()));
        }
        ServiceSource::Build(context) => {
            let mut build = Mapping::new();
            build.insert(string("context"), string(context.as_str()));
            map.insert(string("build"), Value::Mapping(build));
        }
    }

    if let Some(command) = &service.command {
        map.insert(string("command"), list(command));
    }
    if let Some(dir) = &service.working_dir {
        map.insert(string("working_dir"), string(dir.as_str()));
    }
    if !service.environment.is_empty() {
        map.insert(
            string("environment"),
            pairs(service.environment.iter().map(|(k, v)| {
                let value = match v {
                    EnvValue::Plain(p) => p.clone(),
                    EnvValue::Secret(s) => s.expose_secret().to_string(),
                };
                (k.as_str(), value)
            })),
        );
    }
    if let Some(port) = service.port {
        map.insert(
            string("expose"),
            Value::Sequence(vec![string(port.to_string())]),
        );
    }
    if !service.volumes.is_empty() {
        map.insert(string("volumes"), list(&service.volumes));
    }
    map.insert(string("networks"), list(&service.networks));
    if !service.labels.is_empty() {
        map.insert(
            string("labels"),
            pairs(service.labels.iter().map(|(k, v)| (k.as_str(), v.clone()))),
        );
    }
    if let Some(check) = &service.healthcheck {
        map.insert(string("healthcheck"), healthcheck(check));
    }
    if !service.depends_on_healthy.is_empty() {
        let mut deps = Mapping::new();
        for dep in &service.depends_on_healthy {
            let mut condition = Mapping::new();
            condition.insert(string("condition"), string("service_healthy"));
            deps.insert(string(dep.as_str()), Value::Mapping(condition));
        }
        map.insert(string("depends_on"), Value::Mapping(deps));
    }
    map.insert(string("restart"), string("unless-stopped"));

    Value::Mapping(map)
}

impl Manifest {
    /// Renders the compose file, including plaintext credentials.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        let mut services = Mapping::new();
        for svc in &self.services {
            services.insert(string(svc.key.as_str()), service(svc));
        }

        let mut networks = Mapping::new();
        let mut private = Mapping::new();
        private.insert(string("name"), string(self.names.network.as_str()));
        private.insert(string("driver"), string("bridge"));
        networks.insert(string(self.names.network.as_str()), Value::Mapping(private));
        if self.services.iter().any(Service::is_routed) {
            let mut proxy = Mapping::new();
            proxy.insert(string("name"), string(self.proxy_network.as_str()));
            proxy.insert(string("external"), Value::Bool(true));
            networks.insert(string(self.proxy_network.as_str()), Value::Mapping(proxy));
        }

        let mut root = Mapping::new();
        root.insert(string("name"), string(self.names.compose_project.as_str()));
        root.insert(string("services"), Value::Mapping(services));
        root.insert(string("networks"), Value::Mapping(networks));
        if !self.volumes.is_empty() {
            let mut volumes = Mapping::new();
            for volume in &self.volumes {
                let mut entry = Mapping::new();
                entry.insert(string("name"), string(volume.as_str()));
                volumes.insert(string(volume.as_str()), Value::Mapping(entry));
            }
            root.insert(string("volumes"), Value::Mapping(volumes));
        }

        serde_yaml::to_string(&Value::Mapping(root))
    }
}
