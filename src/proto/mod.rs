// Generated from proto/*.proto by build.rs

pub mod common {
    tonic::include_proto!("tenantry.common");
}

pub mod auth {
    tonic::include_proto!("tenantry.auth");
}

pub mod user {
    tonic::include_proto!("tenantry.user");
}

pub mod workspace {
    tonic::include_proto!("tenantry.workspace");
}

pub mod member {
    tonic::include_proto!("tenantry.member");
}

pub mod invitation {
    tonic::include_proto!("tenantry.invitation");
}

pub mod health {
    tonic::include_proto!("grpc.health.v1");
}
