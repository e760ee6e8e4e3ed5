//! CloudFormation template for the single-node cluster
//!
//! Network (VPC, public subnet, internet gateway, routing), a security group
//! exposing the service node port, an instance role that can read the API key
//! secret, and one EC2 instance bootstrapped by the user-data script.

use serde_json::{Value, json};
use snafu::ResultExt;

use crate::error::{EncodeSnafu, SubmissionError};
use crate::provision::{CLUSTER_ID_OUTPUT, SERVICE_URL_OUTPUT};

/// Instance bootstrap script shipped with the binary.
pub const DEFAULT_USER_DATA: &str = include_str!("../assets/user-data.sh");

const INSTANCE_ID: &str = "k8sInstance";

/// Inputs to [`render_template`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParams {
    /// minikube needs at least 2 vCPUs
    pub instance_type: String,
    pub image_id: String,
    pub user_data: String,
    pub node_port: u16,
    pub secret_name: String,
    pub region: String,
    pub app_image: String,
}

/// Render the template document. Pure: no I/O, no globals.
pub fn render_template(params: &TemplateParams) -> Value {
    let user_data = fill_placeholders(&params.user_data, params);
    let user_data_lines: Vec<&str> = user_data.lines().collect();
    let port = params.node_port.to_string();

    json!({
        "AWSTemplateFormatVersion": "2010-09-09",
        "Description": "stonks.template - deploy minikube onto an ec2 instance, then deploy stonks application into the k8s cluster.",
        "Resources": {
            "vpc": {
                "Type": "AWS::EC2::VPC",
                "Properties": {
                    "CidrBlock": "10.0.0.0/16",
                    "Tags": [{"Key": "Name", "Value": "k8s-VPC"}]
                }
            },
            "publicSubnet": {
                "Type": "AWS::EC2::Subnet",
                "Properties": {
                    "CidrBlock": "10.0.1.0/20",
                    "VpcId": {"Ref": "vpc"},
                    "MapPublicIpOnLaunch": true,
                    "Tags": [{"Key": "Name", "Value": "k8s-public-subnet"}]
                }
            },
            "IGW": {
                "Type": "AWS::EC2::InternetGateway",
                "Properties": {
                    "Tags": [{"Key": "Name", "Value": "k8s-IGW"}]
                }
            },
            "igwAttachment": {
                "Type": "AWS::EC2::VPCGatewayAttachment",
                "Properties": {
                    "InternetGatewayId": {"Ref": "IGW"},
                    "VpcId": {"Ref": "vpc"}
                }
            },
            "publicRouteTable": {
                "Type": "AWS::EC2::RouteTable",
                "Properties": {
                    "VpcId": {"Ref": "vpc"},
                    "Tags": [{"Key": "Name", "Value": "k8s-public-RouteTable"}]
                }
            },
            "publicRoute": {
                "Type": "AWS::EC2::Route",
                "DependsOn": "igwAttachment",
                "Properties": {
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "GatewayId": {"Ref": "IGW"},
                    "RouteTableId": {"Ref": "publicRouteTable"}
                }
            },
            "publicSubnetAssociation": {
                "Type": "AWS::EC2::SubnetRouteTableAssociation",
                "Properties": {
                    "SubnetId": {"Ref": "publicSubnet"},
                    "RouteTableId": {"Ref": "publicRouteTable"}
                }
            },
            "k8sClusterSG": {
                "Type": "AWS::EC2::SecurityGroup",
                "Properties": {
                    "GroupDescription": "SG for the k8s cluster",
                    "GroupName": "k8s-cluster-SG",
                    "SecurityGroupIngress": [{
                        "IpProtocol": "tcp",
                        "FromPort": port,
                        "ToPort": port,
                        "CidrIp": "0.0.0.0/0"
                    }],
                    "SecurityGroupEgress": [{"IpProtocol": "-1", "CidrIp": "0.0.0.0/0"}],
                    "VpcId": {"Ref": "vpc"}
                }
            },
            "instanceRole": {
                "Type": "AWS::IAM::Role",
                "Properties": {
                    "RoleName": "k8sClusterRole",
                    "ManagedPolicyArns": ["arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore"],
                    "AssumeRolePolicyDocument": {
                        "Statement": [{
                            "Effect": "Allow",
                            "Principal": {"Service": ["ec2.amazonaws.com"]},
                            "Action": ["sts:AssumeRole"]
                        }]
                    },
                    "Policies": [{
                        "PolicyName": "read-api-key",
                        "PolicyDocument": {
                            "Statement": [{
                                "Effect": "Allow",
                                "Action": ["secretsmanager:GetSecretValue"],
                                "Resource": {
                                    "Fn::Sub": format!(
                                        "arn:aws:secretsmanager:${{AWS::Region}}:${{AWS::AccountId}}:secret:{}-*",
                                        params.secret_name
                                    )
                                }
                            }]
                        }
                    }]
                }
            },
            "instanceProfile": {
                "Type": "AWS::IAM::InstanceProfile",
                "Properties": {
                    "InstanceProfileName": "k8s-cluster-profile",
                    "Roles": [{"Ref": "instanceRole"}]
                }
            },
            INSTANCE_ID: {
                "Type": "AWS::EC2::Instance",
                "Properties": {
                    "InstanceType": params.instance_type,
                    "ImageId": params.image_id,
                    "SubnetId": {"Ref": "publicSubnet"},
                    "SecurityGroupIds": [{"Ref": "k8sClusterSG"}],
                    "IamInstanceProfile": {"Ref": "instanceProfile"},
                    "UserData": {"Fn::Base64": {"Fn::Join": ["\n", user_data_lines]}},
                    "Tags": [{"Key": "Name", "Value": "k8s-cluster"}]
                }
            }
        },
        "Outputs": {
            SERVICE_URL_OUTPUT: {
                "Description": "url for the stonks service",
                "Value": {
                    "Fn::Sub": [
                        format!("http://${{IP}}:{port}"),
                        {"IP": {"Fn::GetAtt": [INSTANCE_ID, "PublicIp"]}}
                    ]
                }
            },
            CLUSTER_ID_OUTPUT: {
                "Description": "instance id of the k8s cluster host",
                "Value": {"Ref": INSTANCE_ID}
            }
        }
    })
}

/// Render and serialise to the document submitted to the backend
pub fn render_template_body(params: &TemplateParams) -> Result<String, SubmissionError> {
    serde_json::to_string_pretty(&render_template(params)).context(EncodeSnafu)
}

fn fill_placeholders(script: &str, params: &TemplateParams) -> String {
    script
        .replace("{{secret_name}}", &params.secret_name)
        .replace("{{region}}", &params.region)
        .replace("{{node_port}}", &params.node_port.to_string())
        .replace("{{app_image}}", &params.app_image)
}

/// Source of the template document handed to the provisioning client
pub trait TemplateProvider: Send + Sync {
    fn render(&self) -> Result<String, SubmissionError>;
}

impl TemplateProvider for TemplateParams {
    fn render(&self) -> Result<String, SubmissionError> {
        render_template_body(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TemplateParams {
        TemplateParams {
            instance_type: "t2.medium".to_string(),
            image_id: "ami-04d29b6f966df1537".to_string(),
            user_data: DEFAULT_USER_DATA.to_string(),
            node_port: 30007,
            secret_name: "stonks-api-key".to_string(),
            region: "us-east-1".to_string(),
            app_image: "stonks:latest".to_string(),
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(render_template(&params()), render_template(&params()));
    }

    #[test]
    fn test_outputs_declare_required_keys() {
        let doc = render_template(&params());
        let outputs = doc["Outputs"].as_object().unwrap();
        assert!(outputs.contains_key(SERVICE_URL_OUTPUT));
        assert!(outputs.contains_key(CLUSTER_ID_OUTPUT));
        assert_eq!(
            doc["Outputs"][SERVICE_URL_OUTPUT]["Value"]["Fn::Sub"][0],
            "http://${IP}:30007"
        );
        assert_eq!(doc["Outputs"][CLUSTER_ID_OUTPUT]["Value"]["Ref"], INSTANCE_ID);
    }

    #[test]
    fn test_instance_uses_explicit_parameters() {
        let mut p = params();
        p.instance_type = "t3.large".to_string();
        p.image_id = "ami-123".to_string();
        p.user_data = "#!/bin/bash\necho {{secret_name}} {{node_port}}".to_string();

        let doc = render_template(&p);
        let instance = &doc["Resources"][INSTANCE_ID]["Properties"];
        assert_eq!(instance["InstanceType"], "t3.large");
        assert_eq!(instance["ImageId"], "ami-123");
        assert_eq!(
            instance["UserData"]["Fn::Base64"]["Fn::Join"][1],
            json!(["#!/bin/bash", "echo stonks-api-key 30007"])
        );
    }

    #[test]
    fn test_security_group_opens_node_port_only() {
        let mut p = params();
        p.node_port = 31000;
        let doc = render_template(&p);
        let ingress = &doc["Resources"]["k8sClusterSG"]["Properties"]["SecurityGroupIngress"];
        assert_eq!(ingress.as_array().unwrap().len(), 1);
        assert_eq!(ingress[0]["FromPort"], "31000");
        assert_eq!(ingress[0]["ToPort"], "31000");
    }

    #[test]
    fn test_default_user_data_placeholders_filled() {
        let body = render_template_body(&params()).unwrap();
        assert!(!body.contains("{{"));
        assert!(body.contains("stonks-api-key"));
    }
}
